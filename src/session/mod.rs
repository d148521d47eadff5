//! App-server sessions.
//!
//! Sits on top of [`rpc`](crate::rpc): picks the URL for a
//! [`ConnectionTarget`], connects and initializes with retry, and wraps the
//! fixed method set in typed calls.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `target` | `ConnectionTarget`, URL normalization, `RetryPolicy` |
//! | `bridge` | `LocalServerBridge` for embedded servers |
//! | `server` | `ServerConnection` |

// ============================================================================
// Submodules
// ============================================================================

/// Embedded server collaborator.
pub mod bridge;

/// `ServerConnection`.
pub mod server;

/// Targets and retry policy.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{LocalServerBridge, local_url};
pub use server::{
    AuthStatus, DEFAULT_APPROVAL_POLICY, DEFAULT_SANDBOX_MODE, FALLBACK_SANDBOX_MODE,
    ServerConnection, is_missing_sandbox_error,
};
pub use target::{ConnectionTarget, RetryPolicy, normalize_ssh_host, websocket_url};
