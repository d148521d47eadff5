//! Remote shell collaborator.
//!
//! The bootstrap only needs "run this string with `/bin/sh`, give me
//! stdout, stderr and the exit code". Any SSH client can provide that by
//! implementing [`RemoteShell`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// CommandOutput
// ============================================================================

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit status.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[inline]
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Returns `true` if the exit code is zero.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout without surrounding whitespace.
    #[inline]
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

// ============================================================================
// RemoteShell
// ============================================================================

/// Executes commands on the remote host.
///
/// Implementations own the SSH session. Concurrent bootstraps on one shell
/// are not supported; callers serialize them.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` through the remote `/bin/sh`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shell`](crate::Error::Shell) if the command could not
    /// be run or did not finish within `timeout`. A non-zero exit is not an
    /// error; it is reported in [`CommandOutput::exit_code`].
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

#[async_trait]
impl<S> RemoteShell for Arc<S>
where
    S: RemoteShell + ?Sized,
{
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        (**self).exec(command, timeout).await
    }
}

// ============================================================================
// Quoting
// ============================================================================

/// Wraps `value` in single quotes for `/bin/sh`.
///
/// Embedded single quotes become `'"'"'`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

// ============================================================================
// Tests
// ============================================================================
