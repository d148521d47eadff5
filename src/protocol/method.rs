//! Fixed method set consumed by the client.
//!
//! Methods follow the app-server's `namespace/action` naming:
//!
//! - `thread/start`, `thread/resume`, `thread/list`
//! - `turn/start`, `turn/interrupt`
//! - `account/login/start`
//!
//! Params structs serialize with camelCase keys and omit unset optionals.
//! Response structs default every non-essential field, and accept the
//! snake_case spellings older servers emit.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Method
// ============================================================================

/// JSON-RPC methods issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `thread/start`
    ThreadStart,
    /// `thread/resume`
    ThreadResume,
    /// `thread/list`
    ThreadList,
    /// `turn/start`
    TurnStart,
    /// `turn/interrupt`
    TurnInterrupt,
    /// `model/list`
    ModelList,
    /// `command/exec`
    CommandExec,
    /// `account/read`
    AccountRead,
    /// `account/login/start`
    AccountLoginStart,
    /// `account/login/cancel`
    AccountLoginCancel,
    /// `account/logout`
    AccountLogout,
}

impl Method {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ThreadStart => "thread/start",
            Self::ThreadResume => "thread/resume",
            Self::ThreadList => "thread/list",
            Self::TurnStart => "turn/start",
            Self::TurnInterrupt => "turn/interrupt",
            Self::ModelList => "model/list",
            Self::CommandExec => "command/exec",
            Self::AccountRead => "account/read",
            Self::AccountLoginStart => "account/login/start",
            Self::AccountLoginCancel => "account/login/cancel",
            Self::AccountLogout => "account/logout",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// initialize
// ============================================================================

/// Params for `initialize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Identifies this client to the server.
    pub client_info: ClientInfo,
}

/// Client identity sent during `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            client_info: ClientInfo {
                name: "Litter".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
        }
    }
}

/// Result of `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Server user agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
}

// ============================================================================
// thread/*
// ============================================================================

/// Params for `thread/list`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListParams {
    /// Pagination cursor from a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Sort key, e.g. `updated_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    /// Restrict to threads started in this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Include archived threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Result of `thread/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListResponse {
    /// Threads on this page.
    #[serde(default)]
    pub data: Vec<ThreadSummary>,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One entry of `thread/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    /// Thread id.
    pub id: String,
    /// Preview of the first user message.
    #[serde(default)]
    pub preview: String,
    /// Model provider.
    #[serde(default, alias = "model_provider")]
    pub model_provider: Option<String>,
    /// Creation time, seconds since the epoch.
    #[serde(default, alias = "created_at")]
    pub created_at: i64,
    /// Last update time, seconds since the epoch.
    #[serde(default, alias = "updated_at")]
    pub updated_at: i64,
    /// Working directory.
    #[serde(default)]
    pub cwd: String,
    /// Version of the CLI that created the thread.
    #[serde(default, alias = "cli_version")]
    pub cli_version: String,
}

/// Params for `thread/start`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Approval policy, e.g. `never`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<String>,
    /// Sandbox mode, e.g. `workspace-write`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// Minimal thread reference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadInfo {
    /// Thread id.
    pub id: String,
}

/// Result of `thread/start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartResponse {
    /// The created thread.
    pub thread: ThreadInfo,
    /// Resolved model.
    #[serde(default)]
    pub model: String,
    /// Model provider.
    #[serde(default, alias = "model_provider")]
    pub model_provider: Option<String>,
    /// Resolved working directory.
    #[serde(default)]
    pub cwd: String,
}

/// Params for `thread/resume`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeParams {
    /// Thread to resume.
    pub thread_id: String,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Approval policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<String>,
    /// Sandbox mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// A past turn returned by `thread/resume`.
///
/// Items stay untyped; rendering them is the UI layer's job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResumedTurn {
    /// Turn id.
    #[serde(default)]
    pub id: String,
    /// Raw thread items.
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Thread with history, returned by `thread/resume`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResumedThread {
    /// Thread id.
    pub id: String,
    /// Turns in order.
    #[serde(default)]
    pub turns: Vec<ResumedTurn>,
}

/// Result of `thread/resume`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeResponse {
    /// Resumed thread.
    pub thread: ResumedThread,
    /// Resolved model.
    #[serde(default)]
    pub model: String,
    /// Model provider.
    #[serde(default, alias = "model_provider")]
    pub model_provider: Option<String>,
    /// Resolved working directory.
    #[serde(default)]
    pub cwd: String,
}

// ============================================================================
// turn/*
// ============================================================================

/// User input item for `turn/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserInput {
    /// Plain text.
    Text {
        /// Message body.
        text: String,
    },
}

impl UserInput {
    /// Creates a text input.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Params for `turn/start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    /// Target thread.
    pub thread_id: String,
    /// Input items.
    pub input: Vec<UserInput>,
    /// Model override for this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Reasoning effort override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// Result of `turn/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResponse {
    /// Id of the started turn.
    #[serde(default)]
    pub turn_id: Option<String>,
}

/// Params for `turn/interrupt`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInterruptParams {
    /// Thread whose running turn should stop.
    pub thread_id: String,
}

// ============================================================================
// model/list
// ============================================================================

/// Params for `model/list`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListParams {
    /// Pagination cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Include models hidden from pickers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_hidden: Option<bool>,
}

/// Reasoning effort a model supports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningEffortOption {
    /// Effort level, e.g. `medium`.
    #[serde(default)]
    pub reasoning_effort: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// One model from `model/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id.
    pub id: String,
    /// Model slug.
    #[serde(default)]
    pub model: String,
    /// Suggested upgrade target.
    #[serde(default)]
    pub upgrade: Option<String>,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Hidden from pickers.
    #[serde(default)]
    pub hidden: bool,
    /// Supported reasoning efforts.
    #[serde(default)]
    pub supported_reasoning_efforts: Vec<ReasoningEffortOption>,
    /// Default reasoning effort.
    #[serde(default)]
    pub default_reasoning_effort: String,
    /// Accepted input modalities.
    #[serde(default)]
    pub input_modalities: Option<Vec<String>>,
    /// Whether personality settings apply.
    #[serde(default)]
    pub supports_personality: Option<bool>,
    /// Server default model.
    #[serde(default)]
    pub is_default: bool,
}

/// Result of `model/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    /// Models on this page.
    #[serde(default)]
    pub data: Vec<ModelInfo>,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

// ============================================================================
// command/exec
// ============================================================================

/// Params for `command/exec`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecParams {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Timeout enforced by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Result of `command/exec`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecResponse {
    /// Process exit code.
    #[serde(default)]
    pub exit_code: i32,
    /// Captured stdout.
    #[serde(default)]
    pub stdout: String,
    /// Captured stderr.
    #[serde(default)]
    pub stderr: String,
}

// ============================================================================
// account/*
// ============================================================================

/// Params for `account/read`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountParams {
    /// Force a token refresh.
    pub refresh_token: bool,
}

/// Logged-in account details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// `apiKey` or `chatgpt`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
    /// Subscription plan.
    #[serde(default)]
    pub plan_type: Option<String>,
}

/// Result of `account/read`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountResponse {
    /// Current account, if logged in.
    #[serde(default)]
    pub account: Option<AccountInfo>,
    /// Server needs OpenAI credentials.
    #[serde(default)]
    pub requires_openai_auth: bool,
}

/// Params for `account/login/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum LoginStartParams {
    /// Browser-based ChatGPT login.
    #[serde(rename = "chatgpt")]
    ChatGpt,
    /// API key login.
    #[serde(rename = "apiKey")]
    ApiKey {
        /// The key.
        #[serde(rename = "apiKey")]
        api_key: String,
    },
}

/// Result of `account/login/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStartResponse {
    /// Login flavor that was started.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Id used to cancel a pending browser login.
    #[serde(default)]
    pub login_id: Option<String>,
    /// URL to open for browser login.
    #[serde(default)]
    pub auth_url: Option<String>,
}

/// Params for `account/login/cancel`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelLoginParams {
    /// Pending login to cancel.
    pub login_id: String,
}

// ============================================================================
// Tests
// ============================================================================
