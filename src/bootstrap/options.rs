//! Remote bootstrap configuration.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// First candidate port.
pub const DEFAULT_REMOTE_PORT: u16 = 8390;

/// Candidates tried after the default port.
pub const DEFAULT_PORT_ALTERNATIVES: u16 = 20;

/// Readiness polls per candidate.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 60;

/// Delay between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls after which a live but silent process is accepted.
pub const DEFAULT_OPTIMISTIC_AFTER_ATTEMPTS: u32 = 8;

/// Log lines fetched when the server dies.
pub const DEFAULT_LOG_TAIL_LINES: usize = 25;

/// Timeout for the launch command.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for every other remote command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// BootstrapOptions
// ============================================================================

/// Tunables for [`RemoteBootstrap`](super::RemoteBootstrap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// First candidate port.
    pub default_port: u16,

    /// Number of ports tried after `default_port`.
    pub port_alternatives: u16,

    /// Readiness polls per candidate.
    pub poll_attempts: u32,

    /// Delay between polls.
    pub poll_interval: Duration,

    /// Poll index from which a live process with an inconclusive listening
    /// check is accepted. `None` disables the shortcut.
    pub optimistic_after_attempts: Option<u32>,

    /// Lines of server log used as failure detail.
    pub log_tail_lines: usize,

    /// Remote directory for server logs.
    pub log_dir: String,

    /// Log file name prefix; files are `<prefix>-<port>.log`.
    pub log_prefix: String,

    /// Timeout for the launch command.
    pub launch_timeout: Duration,

    /// Timeout for probe, listening, liveness and log commands.
    pub command_timeout: Duration,

    /// Listen on `[::]` instead of `0.0.0.0`.
    pub listen_ipv6: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BootstrapOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_port: DEFAULT_REMOTE_PORT,
            port_alternatives: DEFAULT_PORT_ALTERNATIVES,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            optimistic_after_attempts: Some(DEFAULT_OPTIMISTIC_AFTER_ATTEMPTS),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            log_dir: "/tmp".to_string(),
            log_prefix: "litter-app-server".to_string(),
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            listen_ipv6: false,
        }
    }

    /// Options for a host address; IPv6 literals listen on `[::]`.
    #[must_use]
    pub fn for_host(host: &str) -> Self {
        Self::new().with_listen_ipv6(host.contains(':'))
    }

    /// Returns the ordered candidate ports.
    ///
    /// Ports past `u16::MAX` are skipped.
    #[must_use]
    pub fn candidate_ports(&self) -> Vec<u16> {
        (0..=self.port_alternatives)
            .filter_map(|offset| self.default_port.checked_add(offset))
            .collect()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BootstrapOptions {
    /// Sets the first candidate port.
    #[inline]
    #[must_use]
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Sets how many ports follow the default.
    #[inline]
    #[must_use]
    pub fn with_port_alternatives(mut self, count: u16) -> Self {
        self.port_alternatives = count;
        self
    }

    /// Sets polls per candidate.
    #[inline]
    #[must_use]
    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    /// Sets the delay between polls.
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets or disables the optimistic readiness threshold.
    #[inline]
    #[must_use]
    pub fn with_optimistic_after_attempts(mut self, attempts: Option<u32>) -> Self {
        self.optimistic_after_attempts = attempts;
        self
    }

    /// Sets the number of log lines used as failure detail.
    #[inline]
    #[must_use]
    pub fn with_log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    /// Sets the remote log directory.
    #[inline]
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Sets the log file prefix.
    #[inline]
    #[must_use]
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// Sets the launch command timeout.
    #[inline]
    #[must_use]
    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Sets the timeout for other commands.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Chooses the IPv6 wildcard listen address.
    #[inline]
    #[must_use]
    pub fn with_listen_ipv6(mut self, ipv6: bool) -> Self {
        self.listen_ipv6 = ipv6;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
