//! JSON-RPC correlation.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | `RpcClient`: calls, handlers, replies |
//! | `pending` | Pending-request table and call handles |

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC client.
pub mod client;

/// Pending-request bookkeeping.
pub mod pending;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{DisconnectHandler, NotificationHandler, RpcClient, ServerRequestHandler};
pub use pending::{CancelHandle, PendingCall, PendingRequest, PendingTable};
