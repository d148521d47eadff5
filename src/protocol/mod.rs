//! JSON-RPC protocol message types.
//!
//! This module defines the message format exchanged with the app-server
//! over the WebSocket text channel.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `OutgoingRequest` | Client → Server | Method call awaiting a response |
//! | `Response` | Server → Client | Result or error for a call |
//! | `Notification` | Server → Client | Streaming events, no reply |
//! | `ServerRequest` | Server → Client | Approval prompts and similar, reply required |
//! | `OutgoingResult` / `OutgoingError` | Client → Server | Reply to a server request |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope types and inbound classification |
//! | `method` | Method names and typed params/results |
//! | `notification` | Typed notifications, approval requests and decisions |
//! | `value` | Permissive JSON field accessors |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope types and inbound classification.
pub mod envelope;

/// Method names with typed params and results.
pub mod method;

/// Typed notifications and server requests.
pub mod notification;

/// Permissive JSON field accessors.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{
    InboundEnvelope, JSONRPC_VERSION, Notification, OutgoingError, OutgoingRequest,
    OutgoingResult, RpcErrorObject, ServerRequest,
};
pub use method::{
    AccountInfo, CancelLoginParams, ClientInfo, CommandExecParams, CommandExecResponse,
    GetAccountParams, GetAccountResponse, InitializeParams, InitializeResponse,
    LoginStartParams, LoginStartResponse, Method, ModelInfo, ModelListParams, ModelListResponse,
    ReasoningEffortOption, ResumedThread, ResumedTurn, ThreadInfo, ThreadListParams,
    ThreadListResponse, ThreadResumeParams, ThreadResumeResponse, ThreadStartParams,
    ThreadStartResponse, ThreadSummary, TurnInterruptParams, TurnStartParams, TurnStartResponse,
    UserInput,
};
pub use notification::{ApprovalDecision, ParsedNotification, ServerRequestKind};
pub use value::ValueExt;
