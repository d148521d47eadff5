//! Shell snippets run on the remote host.
//!
//! Every snippet is POSIX `sh`. Values that come from the caller (paths,
//! URLs) are single-quoted; numbers are interpolated as-is.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use super::shell::shell_quote;

// ============================================================================
// Constants
// ============================================================================

/// Profile files sourced before probing or launching, in order.
pub const PROFILE_FILES: &[&str] = &[
    ".profile",
    ".bash_profile",
    ".bashrc",
    ".zprofile",
    ".zshrc",
];

/// Primary executable name.
pub const PRIMARY_COMMAND: &str = "codex";

/// Secondary executable name.
pub const SECONDARY_COMMAND: &str = "codex-app-server";

// ============================================================================
// ServerExecutable
// ============================================================================

/// A resolved server executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerExecutable {
    /// The main CLI; started with the `app-server` subcommand.
    Codex(String),
    /// The standalone server binary.
    CodexAppServer(String),
}

impl ServerExecutable {
    /// Parses probe output of the form `kind:path`.
    #[must_use]
    pub fn parse_probe_output(output: &str) -> Option<Self> {
        let (kind, path) = output.trim().split_once(':')?;
        if path.is_empty() {
            return None;
        }

        match kind {
            PRIMARY_COMMAND => Some(Self::Codex(path.to_string())),
            SECONDARY_COMMAND => Some(Self::CodexAppServer(path.to_string())),
            _ => None,
        }
    }

    /// Returns the executable path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Codex(path) | Self::CodexAppServer(path) => path,
        }
    }

    /// Builds the foreground command that listens on `listen_url`.
    #[must_use]
    pub fn launch_command(&self, listen_url: &str) -> String {
        let listen = shell_quote(listen_url);
        match self {
            Self::Codex(path) => format!("{} app-server --listen {listen}", shell_quote(path)),
            Self::CodexAppServer(path) => format!("{} --listen {listen}", shell_quote(path)),
        }
    }
}

impl fmt::Display for ServerExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Codex(_) => PRIMARY_COMMAND,
            Self::CodexAppServer(_) => SECONDARY_COMMAND,
        };
        write!(f, "{kind}:{}", self.path())
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// Sources each existing profile file, ignoring errors.
#[must_use]
pub fn profile_init() -> String {
    let files = PROFILE_FILES
        .iter()
        .map(|file| format!("\"$HOME/{file}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!("for f in {files}; do [ -f \"$f\" ] && . \"$f\" 2>/dev/null; done;")
}

/// Prints `kind:path` for the first executable found, or nothing.
#[must_use]
pub fn probe_script() -> String {
    format!(
        r#"{init}
if command -v {primary} >/dev/null 2>&1; then
  printf '{primary}:%s' "$(command -v {primary})"
elif [ -x "$HOME/.volta/bin/{primary}" ]; then
  printf '{primary}:%s' "$HOME/.volta/bin/{primary}"
elif [ -x "$HOME/.cargo/bin/{primary}" ]; then
  printf '{primary}:%s' "$HOME/.cargo/bin/{primary}"
elif command -v {secondary} >/dev/null 2>&1; then
  printf '{secondary}:%s' "$(command -v {secondary})"
elif [ -x "$HOME/.cargo/bin/{secondary}" ]; then
  printf '{secondary}:%s' "$HOME/.cargo/bin/{secondary}"
fi"#,
        init = profile_init(),
        primary = PRIMARY_COMMAND,
        secondary = SECONDARY_COMMAND,
    )
}

/// Starts the server detached, logging to `log_path`, and prints its pid.
#[must_use]
pub fn launch_script(executable: &ServerExecutable, listen_addr: &str, log_path: &str) -> String {
    let launch = executable.launch_command(&format!("ws://{listen_addr}"));
    format!(
        "{} nohup {launch} </dev/null >{} 2>&1 & echo $!",
        profile_init(),
        shell_quote(log_path)
    )
}

/// Prints something if a TCP listener is bound to `port`.
///
/// Tries `lsof`, then `ss`, then `netstat`.
#[must_use]
pub fn listening_script(port: u16) -> String {
    format!(
        r#"if command -v lsof >/dev/null 2>&1; then
  lsof -nP -iTCP:{port} -sTCP:LISTEN -t 2>/dev/null | head -n 1
elif command -v ss >/dev/null 2>&1; then
  ss -ltn "sport = :{port}" 2>/dev/null | tail -n +2 | head -n 1
elif command -v netstat >/dev/null 2>&1; then
  netstat -ltn 2>/dev/null | awk '{{print $4}}' | grep -E '[:.]{port}$' | head -n 1
fi"#
    )
}

/// Prints `alive` or `dead`.
#[must_use]
pub fn alive_script(pid: u32) -> String {
    format!("kill -0 {pid} >/dev/null 2>&1 && echo alive || echo dead")
}

/// Prints the last `lines` lines of `log_path`.
#[must_use]
pub fn log_tail_script(log_path: &str, lines: usize) -> String {
    format!("tail -n {lines} {} 2>/dev/null", shell_quote(log_path))
}

// ============================================================================
// Addresses
// ============================================================================

/// Wildcard listen address for `port`.
#[must_use]
pub fn listen_address(port: u16, ipv6: bool) -> String {
    if ipv6 {
        format!("[::]:{port}")
    } else {
        format!("0.0.0.0:{port}")
    }
}

/// Per-port log file path.
#[must_use]
pub fn log_path(dir: &str, prefix: &str, port: u16) -> String {
    format!("{}/{prefix}-{port}.log", dir.trim_end_matches('/'))
}

// ============================================================================
// Tests
// ============================================================================
