//! JSON-RPC 2.0 envelopes.
//!
//! Outbound envelopes are plain serializable structs. Inbound text is parsed
//! into a [`serde_json::Value`] first and then classified by shape, since the
//! same connection carries responses, notifications and server-initiated
//! requests.
//!
//! # Classification
//!
//! | Shape | Result |
//! |-------|--------|
//! | `id` + (`result` or `error`), no `method` | [`InboundEnvelope::Response`] |
//! | `id` + `method`, no `result`/`error` | [`InboundEnvelope::ServerRequest`] |
//! | `method`, no `id` | [`InboundEnvelope::Notification`] |
//! | anything else | dropped (`None`) |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::identifiers::RequestId;

use super::value::ValueExt;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Message used when an error object carries no usable message.
const UNKNOWN_ERROR_MESSAGE: &str = "Unknown JSON-RPC error";

// ============================================================================
// Outbound
// ============================================================================

/// A client-to-server request.
///
/// # Format
///
/// ```json
/// {"jsonrpc": "2.0", "id": "1", "method": "thread/start", "params": {...}}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingRequest<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlation id.
    pub id: &'a RequestId,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a Value,
}

impl<'a> OutgoingRequest<'a> {
    /// Creates a request envelope.
    #[inline]
    #[must_use]
    pub fn new(id: &'a RequestId, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// A successful reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResult<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The server's request id, echoed with its original JSON type.
    pub id: &'a Value,
    /// Reply payload.
    pub result: &'a Value,
}

impl<'a> OutgoingResult<'a> {
    /// Creates a result envelope.
    #[inline]
    #[must_use]
    pub fn new(id: &'a Value, result: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// An error reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingError<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The server's request id, echoed with its original JSON type.
    pub id: &'a Value,
    /// Error object.
    pub error: RpcErrorObject,
}

impl<'a> OutgoingError<'a> {
    /// Creates an error envelope.
    #[inline]
    #[must_use]
    pub fn new(id: &'a Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

// ============================================================================
// RpcErrorObject
// ============================================================================

/// JSON-RPC `error` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Creates an error object without `data`.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Reads an error member leniently.
    ///
    /// A missing code becomes `0`, a bare string becomes the message, and an
    /// empty message is replaced with a generic one.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) if !message.is_empty() => Self::new(0, message.clone()),
            Value::Object(_) => {
                let message = value
                    .str_field("message")
                    .filter(|m| !m.is_empty())
                    .unwrap_or(UNKNOWN_ERROR_MESSAGE);
                Self {
                    code: value.i64_field("code").unwrap_or_default(),
                    message: message.to_string(),
                    data: value.get("data").cloned(),
                }
            }
            _ => Self::new(0, UNKNOWN_ERROR_MESSAGE),
        }
    }
}

impl From<RpcErrorObject> for Error {
    fn from(err: RpcErrorObject) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// A request initiated by the server that expects a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    /// Raw id, echoed back verbatim in the reply.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters, `Null` if absent.
    pub params: Value,
}

impl ServerRequest {
    /// Returns the id in normalized string form.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        RequestId::from_value(&self.id)
    }
}

/// A fire-and-forget message from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name, e.g. `turn/completed`.
    pub method: String,
    /// Parameters, `Null` if absent.
    pub params: Value,
}

impl Notification {
    /// Returns the leading path segment of the method.
    ///
    /// `item/agentMessage/delta` has namespace `item`.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.method.split('/').next().unwrap_or_default()
    }
}

/// A classified inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    /// Answer to a request this client sent.
    Response {
        /// Normalized id of the answered request.
        id: RequestId,
        /// `result` on success, parsed `error` on failure.
        outcome: Result<Value, RpcErrorObject>,
    },
    /// Request from the server awaiting a reply.
    ServerRequest(ServerRequest),
    /// Notification from the server.
    Notification(Notification),
}

impl InboundEnvelope {
    /// Parses and classifies a text frame.
    ///
    /// Returns `None` for invalid JSON or any shape that is not exactly one
    /// of the three message kinds.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        match value {
            Value::Object(object) => Self::classify(object),
            _ => None,
        }
    }

    /// Classifies an already-parsed JSON object.
    #[must_use]
    pub fn classify(mut object: Map<String, Value>) -> Option<Self> {
        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.contains_key("method");
        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");

        if has_id && (has_result || has_error) && !has_method {
            let id = object.get("id").and_then(RequestId::from_value)?;
            let outcome = match object.remove("error") {
                Some(error) if !error.is_null() => Err(RpcErrorObject::from_value(&error)),
                _ => Ok(object.remove("result").unwrap_or(Value::Null)),
            };
            return Some(Self::Response { id, outcome });
        }

        if has_id && has_method && !has_result && !has_error {
            let id = object.remove("id")?;
            RequestId::from_value(&id)?;
            return Some(Self::ServerRequest(ServerRequest {
                id,
                method: take_method(&mut object)?,
                params: object.remove("params").unwrap_or(Value::Null),
            }));
        }

        if has_method && !has_id {
            return Some(Self::Notification(Notification {
                method: take_method(&mut object)?,
                params: object.remove("params").unwrap_or(Value::Null),
            }));
        }

        None
    }
}

fn take_method(object: &mut Map<String, Value>) -> Option<String> {
    match object.remove("method") {
        Some(Value::String(method)) => Some(method),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
