//! Where a session connects to, and how hard it tries.
//!
//! # Example
//!
//! ```ignore
//! use litter_transport::session::{ConnectionTarget, websocket_url};
//!
//! let target = ConnectionTarget::remote("fe80::1%en0", 8390);
//! assert_eq!(
//!     websocket_url("fe80::1%en0", 8390)?,
//!     "ws://[fe80::1%25en0]:8390"
//! );
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// ConnectionTarget
// ============================================================================

/// Server a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    /// In-process server started through a
    /// [`LocalServerBridge`](super::LocalServerBridge).
    Local,

    /// Server already listening at `host:port`.
    Remote {
        /// Host name or IP literal, optionally with an IPv6 zone.
        host: String,
        /// TCP port.
        port: u16,
    },

    /// Server to be launched over SSH on `host` before connecting.
    SshThenRemote {
        /// SSH host.
        host: String,
    },
}

impl ConnectionTarget {
    /// Creates a [`ConnectionTarget::Remote`].
    #[inline]
    #[must_use]
    pub fn remote(host: impl Into<String>, port: u16) -> Self {
        Self::Remote {
            host: host.into(),
            port,
        }
    }

    /// Creates a [`ConnectionTarget::SshThenRemote`].
    #[inline]
    #[must_use]
    pub fn ssh(host: impl Into<String>) -> Self {
        Self::SshThenRemote { host: host.into() }
    }

    /// Returns the retry policy used when connecting to this target.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Remote { .. } => RetryPolicy::REMOTE,
            Self::Local | Self::SshThenRemote { .. } => RetryPolicy::LAUNCHED,
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote { host, port } => write!(f, "remote {host}:{port}"),
            Self::SshThenRemote { host } => write!(f, "ssh {host}"),
        }
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Connect-and-initialize retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Rounds before giving up.
    pub max_attempts: u32,
    /// Sleep between rounds.
    pub retry_delay: Duration,
    /// Limit on the `initialize` call.
    pub initialize_timeout: Duration,
    /// Limit on one whole round (connect plus `initialize`).
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Already-running remote servers: fail fast.
    pub const REMOTE: Self = Self {
        max_attempts: 3,
        retry_delay: Duration::from_millis(300),
        initialize_timeout: Duration::from_secs(4),
        attempt_timeout: Duration::from_secs(5),
    };

    /// Servers this client just started, locally or over SSH.
    pub const LAUNCHED: Self = Self {
        max_attempts: 30,
        retry_delay: Duration::from_millis(800),
        initialize_timeout: Duration::from_secs(6),
        attempt_timeout: Duration::from_secs(12),
    };

    /// Sets the number of rounds.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay between rounds.
    #[inline]
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the `initialize` limit.
    #[inline]
    #[must_use]
    pub const fn with_initialize_timeout(mut self, limit: Duration) -> Self {
        self.initialize_timeout = limit;
        self
    }

    /// Sets the per-round limit.
    #[inline]
    #[must_use]
    pub const fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = limit;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::REMOTE
    }
}

// ============================================================================
// Host Normalization
// ============================================================================

/// Builds the `ws://` URL for `host:port`.
///
/// Surrounding whitespace is dropped. A `%zone` on a non-IPv6 host is
/// discarded. IPv6 hosts are bracketed and their zone id is written as
/// `%25zone`, whether it arrived as `%zone` or `%25zone`.
///
/// # Errors
///
/// Returns [`Error::Url`] if `host` is blank.
pub fn websocket_url(host: &str, port: u16) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::Url(url::ParseError::EmptyHost));
    }

    if !host.contains(':') {
        let host = host.split_once('%').map_or(host, |(name, _)| name);
        return Ok(format!("ws://{host}:{port}"));
    }

    let unbracketed = host.trim_matches(|c| c == '[' || c == ']');
    let unescaped = unbracketed.replace("%25", "%");
    let address = match unescaped.split_once('%') {
        Some((address, zone)) => format!("{address}%25{}", urlencoding::encode(zone)),
        None => unescaped,
    };

    Ok(format!("ws://[{address}]:{port}"))
}

/// Normalizes a host for SSH and credential lookup.
///
/// Strips whitespace and brackets and decodes percent escapes (`%25` → `%`).
/// Non-IPv6 hosts lose any `%zone` suffix.
#[must_use]
pub fn normalize_ssh_host(host: &str) -> String {
    let trimmed = host.trim().trim_matches(|c| c == '[' || c == ']');
    let decoded = urlencoding::decode(trimmed)
        .unwrap_or_else(|_| Cow::Owned(trimmed.replace("%25", "%")));

    if decoded.contains(':') {
        return decoded.into_owned();
    }
    decoded
        .split_once('%')
        .map_or_else(|| decoded.to_string(), |(name, _)| name.to_string())
}

// ============================================================================
// Tests
// ============================================================================
