//! Error types for the Litter transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use litter_transport::{Result, RpcClient};
//!
//! async fn example(client: &RpcClient) -> Result<()> {
//!     client.connect("ws://127.0.0.1:8390").await?;
//!     let models = client.call("model/list", serde_json::json!({})).await?;
//!     println!("{models}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::UnsupportedScheme`] |
//! | Handshake | [`Error::HandshakeRejected`], [`Error::HandshakeTooLarge`] |
//! | Framing | [`Error::Frame`], [`Error::FrameTooLarge`] |
//! | RPC | [`Error::Rpc`], [`Error::Timeout`], [`Error::Cancelled`] |
//! | Bootstrap | [`Error::Bootstrap`], [`Error::Shell`], [`Error::Bridge`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// TCP connection or socket I/O failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while an operation was in progress.
    #[error("Connection closed")]
    ConnectionClosed,

    /// URL scheme is not `ws`.
    ///
    /// TLS (`wss`) is not supported.
    #[error("Unsupported URL scheme: {scheme}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Server refused the WebSocket upgrade or answered with a bad accept key.
    #[error("WebSocket handshake rejected: {reason}")]
    HandshakeRejected {
        /// Why the response was rejected.
        reason: String,
    },

    /// Upgrade response headers exceeded the configured limit.
    #[error("WebSocket handshake response exceeds {limit} bytes")]
    HandshakeTooLarge {
        /// Maximum header size in bytes.
        limit: usize,
    },

    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// Malformed WebSocket frame or fragment sequence.
    #[error("Frame error: {message}")]
    Frame {
        /// Description of the framing violation.
        message: String,
    },

    /// Frame or reassembled message is larger than allowed.
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Declared size in bytes.
        size: u64,
        /// Maximum accepted size in bytes.
        limit: u64,
    },

    // ========================================================================
    // RPC Errors
    // ========================================================================
    /// Server answered a request with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional `data` member of the error object.
        data: Option<Value>,
    },

    /// Operation timeout imposed by the caller.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The caller stopped waiting, or the connection was torn down on purpose.
    #[error("Request cancelled")]
    Cancelled,

    // ========================================================================
    // Bootstrap Errors
    // ========================================================================
    /// Remote server bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// Remote shell command could not be executed.
    #[error("Remote shell error: {message}")]
    Shell {
        /// Description of the shell failure.
        message: String,
    },

    /// Native in-process server bridge failed.
    #[error("Local server bridge error: {message}")]
    Bridge {
        /// Description of the bridge failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// BootstrapError
// ============================================================================

/// Failure modes of launching a server over a remote shell.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// Neither server command was found on the remote host.
    #[error("Remote host is missing {searched} in PATH")]
    ExecutableNotFound {
        /// Human-readable list of the names that were probed.
        searched: String,
    },

    /// Every candidate port was taken by another process.
    #[error("Port {port} already in use: {detail}")]
    PortConflict {
        /// Last port attempted.
        port: u16,
        /// Log tail reporting the conflict.
        detail: String,
    },

    /// Launched process died for a reason other than a port conflict.
    #[error("{detail}")]
    ProcessExitedImmediately {
        /// Log tail, or a generic message if the log was empty.
        detail: String,
    },

    /// No candidate port became ready.
    #[error("{detail}")]
    Timeout {
        /// Most specific diagnostic captured while polling.
        detail: String,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an unsupported scheme error.
    #[inline]
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            reason: reason.into(),
        }
    }

    /// Creates a frame error.
    #[inline]
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(size: u64, limit: u64) -> Self {
        Self::FrameTooLarge { size, limit }
    }

    /// Creates an RPC error.
    #[inline]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a remote shell error.
    #[inline]
    pub fn shell(message: impl Into<String>) -> Self {
        Self::Shell {
            message: message.into(),
        }
    }

    /// Creates a local bridge error.
    #[inline]
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::Timeout { .. }
                | Self::Bootstrap(BootstrapError::Timeout { .. })
        )
    }

    /// Returns `true` if this is a cancellation error.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this is a connection-level error.
    ///
    /// Handshake and framing failures count, since both abort the connection.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::UnsupportedScheme { .. }
                | Self::HandshakeRejected { .. }
                | Self::HandshakeTooLarge { .. }
                | Self::Frame { .. }
                | Self::FrameTooLarge { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Timeout { .. }
        )
    }

    /// Returns the JSON-RPC error message if this is an [`Error::Rpc`].
    #[inline]
    #[must_use]
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            Self::Rpc { message, .. } => Some(message),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
