//! Typed views over notifications and server-initiated requests.
//!
//! Parsing is permissive: a payload missing the expected fields degrades to
//! [`ParsedNotification::Unknown`] rather than failing, so new server
//! versions never break the receive path.
//!
//! # Recognized Notifications
//!
//! | Method | Variant |
//! |--------|---------|
//! | `item/agentMessage/delta` | [`ParsedNotification::AgentMessageDelta`] |
//! | `turn/started` | [`ParsedNotification::TurnStarted`] |
//! | `turn/completed` | [`ParsedNotification::TurnCompleted`] |
//! | `account/login/completed` | [`ParsedNotification::AccountLoginCompleted`] |
//! | `account/updated` | [`ParsedNotification::AccountUpdated`] |
//! | `error` | [`ParsedNotification::Error`] |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Value, json};

use super::envelope::{Notification, ServerRequest};
use super::value::ValueExt;

// ============================================================================
// Method Names
// ============================================================================

/// Streaming assistant text.
pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
/// A turn began running.
pub const TURN_STARTED: &str = "turn/started";
/// A turn finished.
pub const TURN_COMPLETED: &str = "turn/completed";
/// Browser login flow finished.
pub const ACCOUNT_LOGIN_COMPLETED: &str = "account/login/completed";
/// Authentication mode changed.
pub const ACCOUNT_UPDATED: &str = "account/updated";
/// Server-side error report.
pub const ERROR: &str = "error";
/// Server asks to run a command.
pub const COMMAND_EXECUTION_APPROVAL: &str = "item/commandExecution/requestApproval";
/// Server asks to apply a file change.
pub const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";

/// Keys that carry the thread id, in lookup order.
const THREAD_ID_KEYS: &[&str] = &["threadId", "conversationId"];

// ============================================================================
// ParsedNotification
// ============================================================================

/// Notification decoded into a known shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNotification {
    /// Incremental assistant text.
    AgentMessageDelta {
        /// Owning thread, when the server includes it.
        thread_id: Option<String>,
        /// Text fragment.
        delta: String,
    },

    /// A turn started.
    TurnStarted {
        /// Owning thread.
        thread_id: Option<String>,
    },

    /// A turn completed.
    TurnCompleted {
        /// Owning thread.
        thread_id: Option<String>,
    },

    /// Browser login finished.
    AccountLoginCompleted {
        /// Login id from `account/login/start`.
        login_id: Option<String>,
        /// Whether login succeeded.
        success: bool,
        /// Failure description.
        error: Option<String>,
    },

    /// Authentication mode changed.
    AccountUpdated {
        /// `apiKey`, `chatgpt`, or `None` when logged out.
        auth_mode: Option<String>,
    },

    /// Server reported an error.
    Error {
        /// Owning thread.
        thread_id: Option<String>,
        /// Error text.
        message: String,
    },

    /// Anything not recognized above.
    Unknown {
        /// Method name.
        method: String,
        /// Raw params.
        params: Value,
    },
}

impl Notification {
    /// Returns the thread id carried in the params, if any.
    #[must_use]
    pub fn thread_id(&self) -> Option<&str> {
        self.params.first_str(THREAD_ID_KEYS)
    }

    /// Parses the notification into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedNotification {
        let params = &self.params;
        let thread_id = self.thread_id().map(str::to_string);

        match self.method.as_str() {
            AGENT_MESSAGE_DELTA => match params.str_field("delta") {
                Some(delta) => ParsedNotification::AgentMessageDelta {
                    thread_id,
                    delta: delta.to_string(),
                },
                None => self.unknown(),
            },

            TURN_STARTED => ParsedNotification::TurnStarted { thread_id },

            TURN_COMPLETED => ParsedNotification::TurnCompleted { thread_id },

            ACCOUNT_LOGIN_COMPLETED => ParsedNotification::AccountLoginCompleted {
                login_id: params.str_field("loginId").map(str::to_string),
                success: params.bool_field("success").unwrap_or_default(),
                error: params.str_field("error").map(str::to_string),
            },

            ACCOUNT_UPDATED => ParsedNotification::AccountUpdated {
                auth_mode: params.str_field("authMode").map(str::to_string),
            },

            ERROR => {
                let message = params
                    .path(&["error", "message"])
                    .and_then(Value::as_str)
                    .or_else(|| params.str_field("message"));
                match message {
                    Some(message) => ParsedNotification::Error {
                        thread_id,
                        message: message.to_string(),
                    },
                    None => self.unknown(),
                }
            }

            _ => self.unknown(),
        }
    }

    fn unknown(&self) -> ParsedNotification {
        ParsedNotification::Unknown {
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }
}

// ============================================================================
// ServerRequestKind
// ============================================================================

/// Server-initiated request decoded into a known shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequestKind {
    /// Permission to run a command.
    CommandExecutionApproval {
        /// Owning thread.
        thread_id: Option<String>,
        /// Owning turn.
        turn_id: Option<String>,
        /// Item awaiting approval.
        item_id: Option<String>,
        /// Command line, when provided.
        command: Option<String>,
        /// Why approval is needed.
        reason: Option<String>,
    },

    /// Permission to apply a file change.
    FileChangeApproval {
        /// Owning thread.
        thread_id: Option<String>,
        /// Owning turn.
        turn_id: Option<String>,
        /// Item awaiting approval.
        item_id: Option<String>,
        /// Why approval is needed.
        reason: Option<String>,
    },

    /// Anything else.
    Other {
        /// Method name.
        method: String,
    },
}

impl ServerRequest {
    /// Decodes the request method and params.
    #[must_use]
    pub fn kind(&self) -> ServerRequestKind {
        let params = &self.params;
        let field = |key: &str| params.str_field(key).map(str::to_string);

        match self.method.as_str() {
            COMMAND_EXECUTION_APPROVAL => ServerRequestKind::CommandExecutionApproval {
                thread_id: field("threadId"),
                turn_id: field("turnId"),
                item_id: field("itemId"),
                command: command_text(params.get("command")),
                reason: field("reason"),
            },
            FILE_CHANGE_APPROVAL => ServerRequestKind::FileChangeApproval {
                thread_id: field("threadId"),
                turn_id: field("turnId"),
                item_id: field("itemId"),
                reason: field("reason"),
            },
            _ => ServerRequestKind::Other {
                method: self.method.clone(),
            },
        }
    }

    /// Returns `true` for command or file-change approval requests.
    #[inline]
    #[must_use]
    pub fn is_approval(&self) -> bool {
        matches!(
            self.method.as_str(),
            COMMAND_EXECUTION_APPROVAL | FILE_CHANGE_APPROVAL
        )
    }
}

/// Commands arrive either as a string or as an argv array.
fn command_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(command) => Some(command.clone()),
        Value::Array(parts) => {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        _ => None,
    }
}

// ============================================================================
// ApprovalDecision
// ============================================================================

/// User decision for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalDecision {
    /// Allow once.
    Accept,
    /// Allow for the rest of the session.
    AcceptForSession,
    /// Deny and let the agent continue.
    Decline,
    /// Deny and abort the turn.
    Cancel,
}

impl ApprovalDecision {
    /// Builds the `{decision: ...}` result payload.
    #[must_use]
    pub fn to_result(self) -> Value {
        json!({ "decision": self })
    }
}

// ============================================================================
// Tests
// ============================================================================
