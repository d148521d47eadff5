//! Litter transport - JSON-RPC over WebSocket for Codex app servers.
//!
//! This library connects a client to a Codex app server, correlates
//! JSON-RPC calls with their responses, and can launch the server on a
//! remote host over SSH first.
//!
//! # Architecture
//!
//! Three layers, each usable on its own:
//!
//! - **Transport**: RFC 6455 client over TCP with one event loop task per
//!   connection
//! - **RPC**: request ids, pending calls, notification and server-request
//!   routing
//! - **Bootstrap**: find, start and poll the server through a remote shell
//!
//! Key design principles:
//!
//! - Every outstanding call resolves: response, RPC error, cancellation or
//!   connection loss
//! - One writer per socket; concurrent callers never interleave frames
//! - Server requests nobody claims are answered with `{}`
//!
//! # Quick Start
//!
//! ```no_run
//! use litter_transport::{ConnectionTarget, Result, ServerConnection};
//! use litter_transport::protocol::ThreadStartParams;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = ServerConnection::new(ConnectionTarget::remote("127.0.0.1", 8390));
//!     server.client().on_notification(|n| println!("{}", n.method));
//!     server.connect().await?;
//!
//!     let thread = server
//!         .start_thread(ThreadStartParams {
//!             cwd: Some("/repo".into()),
//!             ..Default::default()
//!         })
//!         .await?;
//!     server.send_turn(&thread.thread.id, "hello", None, None).await?;
//!
//!     server.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bootstrap`] | Remote server launch over SSH |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request ids |
//! | [`protocol`] | JSON-RPC envelopes and the method set |
//! | [`rpc`] | [`RpcClient`] and pending calls |
//! | [`session`] | [`ServerConnection`] and connection targets |
//! | [`transport`] | WebSocket client |

// ============================================================================
// Modules
// ============================================================================

/// Remote server bootstrap.
///
/// Use [`RemoteBootstrap`] with any [`RemoteShell`] implementation.
pub mod bootstrap;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Request identifiers.
pub mod identifiers;

/// JSON-RPC message types.
///
/// Envelopes, typed params and results, and notification parsing.
pub mod protocol;

/// JSON-RPC client.
pub mod rpc;

/// App-server sessions.
pub mod session;

/// WebSocket transport layer.
///
/// Handshake, framing and the per-connection event loop.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Bootstrap types
pub use bootstrap::{
    BootstrapOptions, BootstrapSession, BootstrapState, CommandOutput, RemoteBootstrap,
    RemoteShell, ServerExecutable,
};

// Error types
pub use error::{BootstrapError, Error, Result};

// Identifier types
pub use identifiers::RequestId;

// RPC types
pub use rpc::{PendingCall, RpcClient};

// Session types
pub use session::{AuthStatus, ConnectionTarget, LocalServerBridge, RetryPolicy, ServerConnection};

// Transport types
pub use transport::{ConnectOptions, Connection, ConnectionState, DisconnectReason};
