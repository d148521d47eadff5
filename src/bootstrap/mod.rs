//! Remote server bootstrap over SSH.
//!
//! Used when the app server runs on another machine reached through an SSH
//! session: find the server executable, start it on a free port (or adopt one
//! already running) and report the port to connect to.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `shell` | `RemoteShell` trait and command output |
//! | `script` | Probe, launch, listening, liveness and log-tail scripts |
//! | `options` | Ports, polling and timeouts |
//! | `remote` | `RemoteBootstrap` state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Bootstrap configuration.
pub mod options;

/// `RemoteBootstrap` state machine.
pub mod remote;

/// Remote shell scripts.
pub mod script;

/// Remote shell collaborator.
pub mod shell;

// ============================================================================
// Re-exports
// ============================================================================

pub use options::BootstrapOptions;
pub use remote::{BootstrapSession, BootstrapState, RemoteBootstrap, is_port_conflict};
pub use script::ServerExecutable;
pub use shell::{CommandOutput, RemoteShell, shell_quote};
