//! Locating, launching and confirming a server over a remote shell.
//!
//! # State Machine
//!
//! ```text
//! Idle → ResolvingExecutable → SelectingPort → Launching → Polling → Ready
//!                                    ↑                        │
//!                                    └──── port conflict ─────┤
//!                                                             ↓
//!                                                           Failed
//! ```
//!
//! For each candidate port:
//!
//! 1. A port that already has a listener is adopted as is.
//! 2. Otherwise the server is started with `nohup`, logging to a per-port file.
//! 3. Readiness is polled. A dead process whose log reports the address in
//!    use moves on to the next port; any other death is fatal.
//! 4. Exhausted polling records the diagnostic and moves on.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, Error, Result};

use super::options::BootstrapOptions;
use super::script::{
    ServerExecutable, alive_script, launch_script, listen_address, listening_script,
    log_path, log_tail_script, probe_script, PRIMARY_COMMAND, SECONDARY_COMMAND,
};
use super::shell::RemoteShell;

// ============================================================================
// Constants
// ============================================================================

/// Failure detail when nothing more specific was captured.
const GENERIC_TIMEOUT: &str = "Timed out waiting for remote server to start.";

/// Failure detail for a silent early exit.
const GENERIC_EXIT: &str = "Server process exited immediately.";

/// Log text that signals a port collision.
static PORT_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)address (already )?in use").expect("port conflict regex is valid")
});

/// Returns `true` if `log` reports the listen address as taken.
#[must_use]
pub fn is_port_conflict(log: &str) -> bool {
    PORT_CONFLICT.is_match(log)
}

// ============================================================================
// BootstrapState
// ============================================================================

/// Progress of [`RemoteBootstrap::start_remote_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    /// Not started, or reset.
    Idle,
    /// Running the executable probe.
    ResolvingExecutable,
    /// Checking whether `port` is already served.
    SelectingPort {
        /// Candidate port.
        port: u16,
    },
    /// Starting the server on `port`.
    Launching {
        /// Candidate port.
        port: u16,
    },
    /// Waiting for `port` to accept connections.
    Polling {
        /// Candidate port.
        port: u16,
        /// Zero-based poll index.
        attempt: u32,
    },
    /// The server is reachable on `port`.
    Ready {
        /// Chosen port.
        port: u16,
    },
    /// Bootstrap gave up.
    Failed {
        /// Surfaced error text.
        reason: String,
    },
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::ResolvingExecutable => f.write_str("resolving executable"),
            Self::SelectingPort { port } => write!(f, "checking port {port}"),
            Self::Launching { port } => write!(f, "launching on port {port}"),
            Self::Polling { port, attempt } => write!(f, "waiting for port {port} ({attempt})"),
            Self::Ready { port } => write!(f, "ready on port {port}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

// ============================================================================
// BootstrapSession
// ============================================================================

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSession {
    /// Executable found by the probe.
    pub executable: ServerExecutable,
    /// Port the server listens on.
    pub port: u16,
}

/// How polling one candidate ended.
enum PollOutcome {
    Ready,
    Conflict(String),
    Exhausted(String),
}

// ============================================================================
// RemoteBootstrap
// ============================================================================

/// Starts (or finds) a server on the host behind `shell`.
///
/// # Example
///
/// ```ignore
/// let mut bootstrap = RemoteBootstrap::new(ssh_shell)
///     .with_options(BootstrapOptions::for_host(&host));
/// let port = bootstrap.start_remote_server().await?;
/// client.connect(&websocket_url(&host, port)?).await?;
/// ```
pub struct RemoteBootstrap<S> {
    shell: S,
    options: BootstrapOptions,
    state: watch::Sender<BootstrapState>,
    session: Option<BootstrapSession>,
}

impl<S> fmt::Debug for RemoteBootstrap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBootstrap")
            .field("options", &self.options)
            .field("state", &*self.state.borrow())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteShell> RemoteBootstrap<S> {
    /// Creates a bootstrap with default options.
    #[must_use]
    pub fn new(shell: S) -> Self {
        let (state, _) = watch::channel(BootstrapState::Idle);
        Self {
            shell,
            options: BootstrapOptions::new(),
            state,
            session: None,
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: BootstrapOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Returns the remote shell.
    #[inline]
    #[must_use]
    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    /// Returns the last successful outcome, until [`reset`](Self::reset).
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&BootstrapSession> {
        self.session.as_ref()
    }

    /// Forgets the session; call when the SSH session ends.
    pub fn reset(&mut self) {
        self.session = None;
        self.set_state(BootstrapState::Idle);
    }

    fn set_state(&self, state: BootstrapState) {
        debug!(%state, "Bootstrap state");
        self.state.send_replace(state);
    }

    /// Ensures a server listens on the remote host and returns its port.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::ExecutableNotFound`] if the probe finds nothing
    /// - [`BootstrapError::ProcessExitedImmediately`] if the server dies for a
    ///   reason other than a port conflict
    /// - [`BootstrapError::PortConflict`] if the last candidate was taken
    /// - [`BootstrapError::Timeout`] if no candidate became ready
    /// - [`Error::Shell`] if the probe or launch command cannot run
    pub async fn start_remote_server(&mut self) -> Result<u16> {
        self.session = None;

        match self.run().await {
            Ok(session) => {
                let port = session.port;
                info!(port, executable = %session.executable, "Remote server ready");
                self.session = Some(session);
                self.set_state(BootstrapState::Ready { port });
                Ok(port)
            }
            Err(e) => {
                warn!(error = %e, "Remote bootstrap failed");
                self.set_state(BootstrapState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<BootstrapSession> {
        self.set_state(BootstrapState::ResolvingExecutable);
        let executable = self.resolve_executable().await?;
        debug!(%executable, "Resolved server executable");

        let mut last_failure: Option<BootstrapError> = None;

        for port in self.options.candidate_ports() {
            self.set_state(BootstrapState::SelectingPort { port });

            if self.is_port_listening(port).await {
                info!(port, "Adopting existing listener");
                return Ok(BootstrapSession { executable, port });
            }

            self.set_state(BootstrapState::Launching { port });
            let log_path = log_path(&self.options.log_dir, &self.options.log_prefix, port);
            let listen = listen_address(port, self.options.listen_ipv6);
            let pid = self.launch(&executable, &listen, &log_path).await?;

            match self.poll(port, pid, &log_path).await? {
                PollOutcome::Ready => return Ok(BootstrapSession { executable, port }),
                PollOutcome::Conflict(detail) => {
                    info!(port, "Port in use, trying next candidate");
                    last_failure = Some(BootstrapError::PortConflict { port, detail });
                }
                PollOutcome::Exhausted(detail) => {
                    warn!(port, "Server did not become ready");
                    if !detail.is_empty() || last_failure.is_none() {
                        last_failure = Some(BootstrapError::Timeout {
                            detail: non_empty_or(detail, GENERIC_TIMEOUT),
                        });
                    }
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| BootstrapError::Timeout {
                detail: GENERIC_TIMEOUT.to_string(),
            })
            .into())
    }

    async fn resolve_executable(&self) -> Result<ServerExecutable> {
        let output = self
            .shell
            .exec(&probe_script(), self.options.command_timeout)
            .await?;

        ServerExecutable::parse_probe_output(output.stdout_trimmed()).ok_or_else(|| {
            Error::from(BootstrapError::ExecutableNotFound {
                searched: format!("{PRIMARY_COMMAND}/{SECONDARY_COMMAND}"),
            })
        })
    }

    async fn launch(
        &self,
        executable: &ServerExecutable,
        listen: &str,
        log_path: &str,
    ) -> Result<Option<u32>> {
        let output = self
            .shell
            .exec(
                &launch_script(executable, listen, log_path),
                self.options.launch_timeout,
            )
            .await?;

        let pid = output.stdout_trimmed().parse().ok();
        debug!(listen, ?pid, "Launched server");
        Ok(pid)
    }

    async fn poll(&self, port: u16, pid: Option<u32>, log_path: &str) -> Result<PollOutcome> {
        let attempts = self.options.poll_attempts;

        for attempt in 0..attempts {
            self.set_state(BootstrapState::Polling { port, attempt });

            if self.is_port_listening(port).await {
                return Ok(PollOutcome::Ready);
            }

            if let Some(pid) = pid {
                match self.is_process_alive(pid).await {
                    Some(false) => {
                        let detail = self.log_tail(log_path).await;
                        if is_port_conflict(&detail) {
                            return Ok(PollOutcome::Conflict(detail));
                        }
                        return Err(BootstrapError::ProcessExitedImmediately {
                            detail: non_empty_or(detail, GENERIC_EXIT),
                        }
                        .into());
                    }
                    Some(true) if self.is_optimistic(attempt) => {
                        debug!(port, attempt, "Process alive, assuming ready");
                        return Ok(PollOutcome::Ready);
                    }
                    _ => {}
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }

        let detail = self.log_tail(log_path).await;
        if is_port_conflict(&detail) {
            return Ok(PollOutcome::Conflict(detail));
        }
        Ok(PollOutcome::Exhausted(detail))
    }

    fn is_optimistic(&self, attempt: u32) -> bool {
        self.options
            .optimistic_after_attempts
            .is_some_and(|threshold| attempt >= threshold)
    }

    /// A failing check counts as "not listening".
    async fn is_port_listening(&self, port: u16) -> bool {
        match self
            .shell
            .exec(&listening_script(port), self.options.command_timeout)
            .await
        {
            Ok(output) => !output.stdout_trimmed().is_empty(),
            Err(e) => {
                debug!(port, error = %e, "Listening check failed");
                false
            }
        }
    }

    /// `None` when the check itself failed.
    async fn is_process_alive(&self, pid: u32) -> Option<bool> {
        match self
            .shell
            .exec(&alive_script(pid), self.options.command_timeout)
            .await
        {
            Ok(output) => Some(output.stdout_trimmed() == "alive"),
            Err(e) => {
                debug!(pid, error = %e, "Liveness check failed");
                None
            }
        }
    }

    async fn log_tail(&self, log_path: &str) -> String {
        self.shell
            .exec(
                &log_tail_script(log_path, self.options.log_tail_lines),
                self.options.command_timeout,
            )
            .await
            .map(|output| output.stdout_trimmed().to_string())
            .unwrap_or_default()
    }
}

fn non_empty_or(detail: String, fallback: &str) -> String {
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rustc_hash::{FxHashMap, FxHashSet};

    use crate::bootstrap::shell::CommandOutput;

    /// What a launched server does on a given port.
    #[derive(Debug, Clone)]
    enum Launch {
        /// Starts listening after this many listening checks.
        ListensAfter(u32),
        /// Exits with this log content.
        Dies(&'static str),
        /// Stays alive and never shows up in the listening check.
        Silent,
    }

    #[derive(Default)]
    struct Host {
        probe: String,
        already_listening: FxHashSet<u16>,
        behaviors: FxHashMap<u16, Launch>,
        launched: Vec<u16>,
        checks_since_launch: FxHashMap<u16, u32>,
        commands: Vec<String>,
        fail_listening_checks: bool,
    }

    /// Answers bootstrap scripts from a scripted host model.
    #[derive(Default)]
    struct FakeShell {
        host: Mutex<Host>,
    }

    impl FakeShell {
        fn with_probe(probe: &str) -> Self {
            let shell = Self::default();
            shell.host.lock().probe = probe.to_string();
            shell
        }

        fn listening(self, port: u16) -> Self {
            self.host.lock().already_listening.insert(port);
            self
        }

        fn on_launch(self, port: u16, launch: Launch) -> Self {
            self.host.lock().behaviors.insert(port, launch);
            self
        }

        fn launched(&self) -> Vec<u16> {
            self.host.lock().launched.clone()
        }

        fn commands(&self) -> Vec<String> {
            self.host.lock().commands.clone()
        }
    }

    fn pid_port(pid: u32) -> u16 {
        (pid - 10_000) as u16
    }

    fn number_after(command: &str, marker: &str) -> Option<u32> {
        let rest = &command[command.find(marker)? + marker.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        async fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
            let mut host = self.host.lock();
            host.commands.push(command.to_string());

            if command.contains("printf 'codex:%s'") {
                return Ok(CommandOutput::success(host.probe.clone()));
            }

            if command.contains("nohup") {
                let port = number_after(command, "ws://0.0.0.0:")
                    .or_else(|| number_after(command, "ws://[::]:"))
                    .expect("listen port") as u16;
                host.launched.push(port);
                host.checks_since_launch.insert(port, 0);
                return Ok(CommandOutput::success(format!("{}\n", 10_000 + u32::from(port))));
            }

            if command.contains("lsof -nP -iTCP:") {
                if host.fail_listening_checks {
                    return Err(Error::shell("channel closed"));
                }
                let port = number_after(command, "-iTCP:").expect("port") as u16;
                if host.already_listening.contains(&port) {
                    return Ok(CommandOutput::success("999\n"));
                }
                let Some(checks) = host.checks_since_launch.get_mut(&port) else {
                    return Ok(CommandOutput::default());
                };
                let seen = *checks;
                *checks += 1;
                let listening = matches!(
                    host.behaviors.get(&port),
                    Some(Launch::ListensAfter(after)) if seen >= *after
                );
                let stdout = if listening { "4242\n" } else { "" };
                return Ok(CommandOutput::success(stdout));
            }

            if command.starts_with("kill -0") {
                let port = pid_port(number_after(command, "kill -0 ").expect("pid"));
                let alive = !matches!(host.behaviors.get(&port), Some(Launch::Dies(_)));
                return Ok(CommandOutput::success(if alive { "alive\n" } else { "dead\n" }));
            }

            if command.starts_with("tail -n") {
                let port = number_after(command, "litter-app-server-").expect("log port") as u16;
                let log = match host.behaviors.get(&port) {
                    Some(Launch::Dies(log)) => *log,
                    _ => "",
                };
                return Ok(CommandOutput::success(log));
            }

            Err(Error::shell(format!("unexpected command: {command}")))
        }
    }

    fn fast_options() -> BootstrapOptions {
        BootstrapOptions::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_poll_attempts(12)
    }

    fn bootstrap(shell: FakeShell) -> RemoteBootstrap<std::sync::Arc<FakeShell>> {
        RemoteBootstrap::new(std::sync::Arc::new(shell)).with_options(fast_options())
    }

    const CODEX: &str = "codex:/usr/local/bin/codex";

    #[test]
    fn test_conflict_detection() {
        assert!(is_port_conflict("Error: Address already in use (os error 98)"));
        assert!(is_port_conflict("bind failed: address in use"));
        assert!(!is_port_conflict("permission denied"));
    }

    #[tokio::test]
    async fn test_adopts_existing_listener() {
        let mut bootstrap = bootstrap(FakeShell::with_probe(CODEX).listening(8390));

        let port = bootstrap.start_remote_server().await.expect("port");

        assert_eq!(port, 8390);
        assert!(bootstrap.shell().launched().is_empty());
        assert_eq!(bootstrap.state(), BootstrapState::Ready { port: 8390 });
        assert_eq!(
            bootstrap.session(),
            Some(&BootstrapSession {
                executable: ServerExecutable::Codex("/usr/local/bin/codex".into()),
                port: 8390,
            })
        );
    }

    #[tokio::test]
    async fn test_launches_and_waits_for_listener() {
        let shell = FakeShell::with_probe(CODEX).on_launch(8390, Launch::ListensAfter(2));
        let mut bootstrap = bootstrap(shell);

        assert_eq!(bootstrap.start_remote_server().await.expect("port"), 8390);
        assert_eq!(bootstrap.shell().launched(), vec![8390]);

        let launch = bootstrap
            .shell()
            .commands()
            .into_iter()
            .find(|c| c.contains("nohup"))
            .expect("launch command");
        assert!(launch.contains("'/usr/local/bin/codex' app-server --listen 'ws://0.0.0.0:8390'"));
        assert!(launch.contains(">'/tmp/litter-app-server-8390.log' 2>&1 & echo $!"));
    }

    #[tokio::test]
    async fn test_conflict_advances_to_next_port() {
        let shell = FakeShell::with_probe(CODEX)
            .on_launch(8390, Launch::Dies("Error: Address already in use (os error 98)"))
            .on_launch(8391, Launch::ListensAfter(0));
        let mut bootstrap = bootstrap(shell);

        assert_eq!(bootstrap.start_remote_server().await.expect("port"), 8391);
        assert_eq!(bootstrap.shell().launched(), vec![8390, 8391]);
    }

    #[tokio::test]
    async fn test_other_exit_is_fatal() {
        let shell = FakeShell::with_probe(CODEX)
            .on_launch(8390, Launch::Dies("error: unknown flag --listen"))
            .on_launch(8391, Launch::ListensAfter(0));
        let mut bootstrap = bootstrap(shell);

        let err = bootstrap.start_remote_server().await.expect_err("fatal");

        assert!(matches!(
            err,
            Error::Bootstrap(BootstrapError::ProcessExitedImmediately { ref detail })
                if detail == "error: unknown flag --listen"
        ));
        assert_eq!(bootstrap.shell().launched(), vec![8390]);
        assert!(matches!(bootstrap.state(), BootstrapState::Failed { .. }));
        assert!(bootstrap.session().is_none());
    }

    #[tokio::test]
    async fn test_silent_exit_uses_generic_detail() {
        let shell = FakeShell::with_probe(CODEX).on_launch(8390, Launch::Dies(""));
        let mut bootstrap = bootstrap(shell);

        let err = bootstrap.start_remote_server().await.expect_err("fatal");
        assert_eq!(err.to_string(), GENERIC_EXIT);
    }

    #[tokio::test]
    async fn test_optimistic_ready_after_threshold() {
        let shell = FakeShell::with_probe(CODEX).on_launch(8390, Launch::Silent);
        let mut bootstrap = bootstrap(shell);

        assert_eq!(bootstrap.start_remote_server().await.expect("port"), 8390);

        let polls = bootstrap
            .shell()
            .commands()
            .iter()
            .filter(|c| c.starts_with("kill -0"))
            .count();
        assert_eq!(polls, 9);
    }

    #[tokio::test]
    async fn test_optimistic_disabled_exhausts_candidates() {
        let shell = FakeShell::with_probe(CODEX);
        let options = fast_options()
            .with_optimistic_after_attempts(None)
            .with_poll_attempts(3)
            .with_port_alternatives(1);
        let mut bootstrap = RemoteBootstrap::new(shell).with_options(options);

        let err = bootstrap.start_remote_server().await.expect_err("timeout");

        assert!(matches!(
            err,
            Error::Bootstrap(BootstrapError::Timeout { ref detail }) if detail == GENERIC_TIMEOUT
        ));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_all_ports_conflicting() {
        let mut shell = FakeShell::with_probe(CODEX);
        for port in 8390..=8392 {
            shell = shell.on_launch(port, Launch::Dies("address already in use"));
        }
        let options = fast_options().with_port_alternatives(2);
        let mut bootstrap = RemoteBootstrap::new(shell).with_options(options);

        let err = bootstrap.start_remote_server().await.expect_err("conflict");

        assert!(matches!(
            err,
            Error::Bootstrap(BootstrapError::PortConflict { port: 8392, ref detail })
                if detail == "address already in use"
        ));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mut bootstrap = bootstrap(FakeShell::with_probe(""));

        let err = bootstrap.start_remote_server().await.expect_err("missing");
        assert!(matches!(
            err,
            Error::Bootstrap(BootstrapError::ExecutableNotFound { ref searched })
                if searched == "codex/codex-app-server"
        ));
    }

    #[tokio::test]
    async fn test_failed_listening_check_is_not_listening() {
        let shell = FakeShell::with_probe(CODEX).on_launch(8390, Launch::Silent);
        shell.host.lock().fail_listening_checks = true;
        let mut bootstrap = bootstrap(shell);

        assert_eq!(bootstrap.start_remote_server().await.expect("optimistic"), 8390);
        assert_eq!(bootstrap.shell().launched(), vec![8390]);
    }

    #[tokio::test]
    async fn test_ipv6_listen_address() {
        let shell = FakeShell::with_probe("codex-app-server:/opt/bin/codex-app-server")
            .on_launch(8390, Launch::ListensAfter(0));
        let options = fast_options().with_listen_ipv6(true);
        let mut bootstrap = RemoteBootstrap::new(shell).with_options(options);

        bootstrap.start_remote_server().await.expect("port");

        let launch = bootstrap
            .shell()
            .commands()
            .into_iter()
            .find(|c| c.contains("nohup"))
            .expect("launch");
        assert!(launch.contains("'/opt/bin/codex-app-server' --listen 'ws://[::]:8390'"));
    }

    #[tokio::test]
    async fn test_state_updates_and_reset() {
        let mut bootstrap = bootstrap(FakeShell::with_probe(CODEX).listening(8390));
        let mut states = bootstrap.subscribe();

        bootstrap.start_remote_server().await.expect("port");
        assert!(states.has_changed().expect("sender alive"));
        assert_eq!(*states.borrow_and_update(), BootstrapState::Ready { port: 8390 });

        bootstrap.reset();
        assert_eq!(bootstrap.state(), BootstrapState::Idle);
        assert!(bootstrap.session().is_none());
    }
}
