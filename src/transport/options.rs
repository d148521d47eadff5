//! Connection limits and timeouts.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use litter_transport::ConnectOptions;
//!
//! let options = ConnectOptions::new()
//!     .with_connect_timeout(Duration::from_secs(3))
//!     .with_max_message_size(8 * 1024 * 1024);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upgrade handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on the upgrade response header block.
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 64 * 1024;

/// Default cap on one reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default time `disconnect` waits for the receive loop to exit.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// ConnectOptions
// ============================================================================

/// Transport connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on TCP connect.
    pub connect_timeout: Duration,

    /// Bound on the HTTP upgrade exchange.
    pub handshake_timeout: Duration,

    /// Largest accepted response header block.
    pub max_handshake_size: usize,

    /// Largest accepted frame payload or reassembled message.
    pub max_message_size: usize,

    /// How long `disconnect` waits before aborting the receive loop.
    pub close_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectOptions {
    /// Creates options with default limits.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectOptions {
    /// Sets the TCP connect timeout.
    #[inline]
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the response header cap.
    #[inline]
    #[must_use]
    pub const fn with_max_handshake_size(mut self, bytes: usize) -> Self {
        self.max_handshake_size = bytes;
        self
    }

    /// Sets the message size cap.
    #[inline]
    #[must_use]
    pub const fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
