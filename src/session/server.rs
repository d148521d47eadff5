//! One app-server session: target resolution, connect-and-initialize retry
//! and the typed method API.
//!
//! # Example
//!
//! ```ignore
//! use litter_transport::session::{ConnectionTarget, ServerConnection};
//! use litter_transport::protocol::ThreadStartParams;
//!
//! let server = ServerConnection::new(ConnectionTarget::remote("build.local", 8390));
//! server.connect().await?;
//!
//! let thread = server
//!     .start_thread(ThreadStartParams {
//!         cwd: Some("/repo".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! server.send_turn(&thread.thread.id, "run the tests", None, None).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::bootstrap::{RemoteBootstrap, RemoteShell};
use crate::error::{Error, Result};
use crate::protocol::{
    CancelLoginParams, CommandExecParams, CommandExecResponse, GetAccountParams,
    GetAccountResponse, InitializeParams, InitializeResponse, LoginStartParams,
    LoginStartResponse, Method, ModelListParams, ModelListResponse, ParsedNotification,
    ThreadListParams, ThreadListResponse, ThreadResumeParams, ThreadResumeResponse,
    ThreadStartParams, ThreadStartResponse, TurnInterruptParams, TurnStartParams,
    TurnStartResponse, UserInput,
};
use crate::rpc::RpcClient;
use crate::transport::ConnectOptions;

use super::bridge::{LocalServerBridge, local_url};
use super::target::{ConnectionTarget, RetryPolicy, websocket_url};

// ============================================================================
// Constants
// ============================================================================

/// Sandbox used for new and resumed threads unless the caller picks one.
pub const DEFAULT_SANDBOX_MODE: &str = "workspace-write";

/// Sandbox retried when the host cannot provide the Linux sandbox.
pub const FALLBACK_SANDBOX_MODE: &str = "danger-full-access";

/// Approval policy used unless the caller picks one.
pub const DEFAULT_APPROVAL_POLICY: &str = "never";

/// Error fragments meaning the Linux sandbox helper is unavailable.
const MISSING_SANDBOX_MARKERS: &[&str] = &[
    "codex-linux-sandbox was required but not provided",
    "missing codex-linux-sandbox executable path",
];

/// Limit on `account/read` during [`ServerConnection::check_auth`].
const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(4);

/// Page size for `model/list`.
const MODEL_LIST_LIMIT: u32 = 50;

/// Returns `true` if `error` reports a missing Linux sandbox helper.
#[must_use]
pub fn is_missing_sandbox_error(error: &Error) -> bool {
    let Some(message) = error.rpc_message() else {
        return false;
    };
    let lower = message.to_lowercase();
    MISSING_SANDBOX_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

// ============================================================================
// AuthStatus
// ============================================================================

/// Account state as last reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthStatus {
    /// Not checked yet.
    #[default]
    Unknown,
    /// No credentials, or the check failed.
    NotLoggedIn,
    /// Authenticated with an API key.
    ApiKey,
    /// Authenticated through a ChatGPT account.
    ChatGpt {
        /// Account email, empty if the server did not send one.
        email: String,
    },
}

impl AuthStatus {
    /// Maps an `account/read` result.
    #[must_use]
    pub fn from_account(response: &GetAccountResponse) -> Self {
        match &response.account {
            Some(account) if account.kind == "chatgpt" => Self::ChatGpt {
                email: account.email.clone().unwrap_or_default(),
            },
            Some(account) if account.kind == "apiKey" => Self::ApiKey,
            _ => Self::NotLoggedIn,
        }
    }

    /// Returns `true` for either authenticated variant.
    #[inline]
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::ApiKey | Self::ChatGpt { .. })
    }
}

// ============================================================================
// AccountState
// ============================================================================

/// Auth fields shared with the notification handler.
#[derive(Debug, Default)]
struct AccountState {
    status: AuthStatus,
    pending_login_id: Option<String>,
    auth_url: Option<String>,
    login_completed: bool,
}

impl AccountState {
    fn apply(&mut self, notification: &ParsedNotification) {
        match notification {
            ParsedNotification::AccountLoginCompleted { success: true, .. } => {
                self.pending_login_id = None;
                self.auth_url = None;
                self.login_completed = true;
            }
            ParsedNotification::AccountUpdated { auth_mode } => {
                self.status = match auth_mode.as_deref() {
                    Some("apiKey") => AuthStatus::ApiKey,
                    Some("chatgpt") => match &self.status {
                        status @ AuthStatus::ChatGpt { .. } => status.clone(),
                        _ => AuthStatus::ChatGpt {
                            email: String::new(),
                        },
                    },
                    _ => AuthStatus::NotLoggedIn,
                };
            }
            _ => {}
        }
    }
}

// ============================================================================
// ServerConnection
// ============================================================================

/// A session with one app server.
///
/// Owns an [`RpcClient`]. Register notification and server-request
/// handlers through [`client`](Self::client) before connecting.
pub struct ServerConnection {
    target: ConnectionTarget,
    client: Arc<RpcClient>,
    policy: RetryPolicy,
    bridge: Option<Arc<dyn LocalServerBridge>>,
    url: Mutex<Option<String>>,
    account: Arc<Mutex<AccountState>>,
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("target", &self.target)
            .field("url", &*self.url.lock())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServerConnection {
    /// Creates a disconnected session using the target's retry policy.
    #[must_use]
    pub fn new(target: ConnectionTarget) -> Self {
        Self::with_client_options(target, ConnectOptions::new())
    }

    /// Creates a disconnected session with custom transport options.
    #[must_use]
    pub fn with_client_options(target: ConnectionTarget, options: ConnectOptions) -> Self {
        let client = Arc::new(RpcClient::with_options(options));
        let account = Arc::new(Mutex::new(AccountState::default()));

        {
            let account = Arc::clone(&account);
            client.on_notification(move |notification| {
                if notification.namespace() == "account" {
                    account.lock().apply(&notification.parse());
                }
            });
        }

        Self {
            policy: target.retry_policy(),
            target,
            client,
            bridge: None,
            url: Mutex::new(None),
            account,
        }
    }

    /// Sets the bridge used for [`ConnectionTarget::Local`].
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<dyn LocalServerBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ServerConnection {
    /// Returns the target.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Returns the RPC client, for handler registration and raw calls.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    /// Returns the retry policy.
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the URL of the last successful connection.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.url.lock().clone()
    }

    /// Returns `true` while the transport is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Returns the last known account state.
    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        self.account.lock().status.clone()
    }

    /// Returns the browser login URL while a ChatGPT login is pending.
    #[must_use]
    pub fn auth_url(&self) -> Option<String> {
        self.account.lock().auth_url.clone()
    }

    /// Returns `true` once the server reported a successful browser login.
    #[must_use]
    pub fn login_completed(&self) -> bool {
        self.account.lock().login_completed
    }
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

impl ServerConnection {
    /// Connects to the target and runs `initialize`.
    ///
    /// Does nothing if already connected. Local targets start the server
    /// through the bridge first.
    ///
    /// # Errors
    ///
    /// - [`Error::Bridge`] if a local target has no bridge or it fails
    /// - [`Error::Url`] if a remote host is blank
    /// - [`Error::Connection`] for an SSH target; use
    ///   [`connect_via_bootstrap`](Self::connect_via_bootstrap)
    /// - the last attempt's error once every attempt failed
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let url = match &self.target {
            ConnectionTarget::Local => {
                let bridge = self
                    .bridge
                    .as_ref()
                    .ok_or_else(|| Error::bridge("no local server bridge configured"))?;
                local_url(bridge.start().await?)
            }
            ConnectionTarget::Remote { host, port } => websocket_url(host, *port)?,
            ConnectionTarget::SshThenRemote { host } => {
                return Err(Error::connection(format!(
                    "{host}: SSH targets connect through a remote bootstrap"
                )));
            }
        };

        self.connect_and_initialize(&url).await
    }

    /// Starts (or adopts) the server over SSH, then connects to it.
    ///
    /// Returns the server port.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the target is not
    ///   [`ConnectionTarget::SshThenRemote`]
    /// - any [`RemoteBootstrap::start_remote_server`] error
    /// - as [`connect`](Self::connect) once the port is known
    pub async fn connect_via_bootstrap<S>(&self, bootstrap: &mut RemoteBootstrap<S>) -> Result<u16>
    where
        S: RemoteShell,
    {
        let ConnectionTarget::SshThenRemote { host } = &self.target else {
            return Err(Error::connection(format!(
                "{} is not an SSH target",
                self.target
            )));
        };

        let port = bootstrap.start_remote_server().await?;
        let url = websocket_url(host, port)?;
        self.connect_and_initialize(&url).await?;
        Ok(port)
    }

    /// Closes the transport, failing every pending call.
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
        *self.url.lock() = None;
    }

    async fn connect_and_initialize(&self, url: &str) -> Result<()> {
        let policy = self.policy;
        let mut last_error = Error::connection(format!("{url}: no connection attempts made"));

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                sleep(policy.retry_delay).await;
            }
            self.client.disconnect().await;

            debug!(url, attempt, max_attempts = policy.max_attempts, "Connecting");

            let outcome = timeout(policy.attempt_timeout, self.connect_once(url)).await;
            match outcome {
                Ok(Ok(response)) => {
                    info!(
                        url,
                        attempt,
                        user_agent = response.user_agent.as_deref().unwrap_or(""),
                        "Server initialized"
                    );
                    *self.url.lock() = Some(url.to_string());
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(url, attempt, error = %e, "Connect attempt failed");
                    last_error = e;
                }
                Err(_) => {
                    let limit = policy.attempt_timeout.as_millis() as u64;
                    warn!(url, attempt, timeout_ms = limit, "Connect attempt timed out");
                    last_error = Error::timeout("connect and initialize", limit);
                }
            }
        }

        self.client.disconnect().await;
        Err(last_error)
    }

    async fn connect_once(&self, url: &str) -> Result<InitializeResponse> {
        self.client.connect(url).await?;
        self.initialize().await
    }
}

// ============================================================================
// Methods
// ============================================================================

impl ServerConnection {
    /// `initialize`, bounded by the policy's initialize timeout.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request_with_timeout`] error.
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        self.client
            .request_with_timeout(
                Method::Initialize,
                &InitializeParams::default(),
                self.policy.initialize_timeout,
            )
            .await
    }

    /// `thread/list`.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn list_threads(&self, params: &ThreadListParams) -> Result<ThreadListResponse> {
        self.client.request(Method::ThreadList, params).await
    }

    /// `thread/start`.
    ///
    /// Without a sandbox in `params`, starts with [`DEFAULT_SANDBOX_MODE`]
    /// and retries once with [`FALLBACK_SANDBOX_MODE`] if the server lacks
    /// the Linux sandbox helper.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error from the last attempt.
    pub async fn start_thread(&self, mut params: ThreadStartParams) -> Result<ThreadStartResponse> {
        let pinned = params.sandbox.is_some();
        params
            .approval_policy
            .get_or_insert_with(|| DEFAULT_APPROVAL_POLICY.to_string());
        params
            .sandbox
            .get_or_insert_with(|| DEFAULT_SANDBOX_MODE.to_string());

        match self.client.request(Method::ThreadStart, &params).await {
            Err(e) if !pinned && is_missing_sandbox_error(&e) => {
                warn!(error = %e, "Retrying thread/start without the Linux sandbox");
                params.sandbox = Some(FALLBACK_SANDBOX_MODE.to_string());
                self.client.request(Method::ThreadStart, &params).await
            }
            result => result,
        }
    }

    /// `thread/resume`, with the same sandbox fallback as
    /// [`start_thread`](Self::start_thread).
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error from the last attempt.
    pub async fn resume_thread(
        &self,
        mut params: ThreadResumeParams,
    ) -> Result<ThreadResumeResponse> {
        let pinned = params.sandbox.is_some();
        params
            .approval_policy
            .get_or_insert_with(|| DEFAULT_APPROVAL_POLICY.to_string());
        params
            .sandbox
            .get_or_insert_with(|| DEFAULT_SANDBOX_MODE.to_string());

        match self.client.request(Method::ThreadResume, &params).await {
            Err(e) if !pinned && is_missing_sandbox_error(&e) => {
                warn!(thread_id = %params.thread_id, error = %e, "Retrying thread/resume without the Linux sandbox");
                params.sandbox = Some(FALLBACK_SANDBOX_MODE.to_string());
                self.client.request(Method::ThreadResume, &params).await
            }
            result => result,
        }
    }

    /// `turn/start` with a single text input.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn send_turn(
        &self,
        thread_id: &str,
        text: &str,
        model: Option<String>,
        effort: Option<String>,
    ) -> Result<TurnStartResponse> {
        let params = TurnStartParams {
            thread_id: thread_id.to_string(),
            input: vec![UserInput::text(text)],
            model,
            effort,
        };
        self.client.request(Method::TurnStart, &params).await
    }

    /// `turn/interrupt`. Failures are logged and dropped.
    pub async fn interrupt(&self, thread_id: &str) {
        let params = TurnInterruptParams {
            thread_id: thread_id.to_string(),
        };
        if let Err(e) = self
            .client
            .request::<_, Value>(Method::TurnInterrupt, &params)
            .await
        {
            debug!(thread_id, error = %e, "Interrupt failed");
        }
    }

    /// `model/list`, visible models only.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn list_models(&self) -> Result<ModelListResponse> {
        let params = ModelListParams {
            cursor: None,
            limit: Some(MODEL_LIST_LIMIT),
            include_hidden: Some(false),
        };
        self.client.request(Method::ModelList, &params).await
    }

    /// `command/exec`.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn exec_command(&self, params: &CommandExecParams) -> Result<CommandExecResponse> {
        self.client.request(Method::CommandExec, params).await
    }

    /// Replies to a server-initiated request, such as an approval prompt.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::send_result`].
    pub async fn respond_to_server_request(&self, id: &Value, result: Value) -> Result<()> {
        self.client.send_result(id, result).await
    }
}

// ============================================================================
// Account
// ============================================================================

impl ServerConnection {
    /// `account/read` without a token refresh.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn read_account(&self) -> Result<GetAccountResponse> {
        self.client
            .request(Method::AccountRead, &GetAccountParams::default())
            .await
    }

    /// Refreshes and returns [`auth_status`](Self::auth_status).
    ///
    /// Any failure, including a slow server, reads as
    /// [`AuthStatus::NotLoggedIn`].
    pub async fn check_auth(&self) -> AuthStatus {
        let status = match self
            .client
            .request_with_timeout::<_, GetAccountResponse>(
                Method::AccountRead,
                &GetAccountParams::default(),
                AUTH_CHECK_TIMEOUT,
            )
            .await
        {
            Ok(response) => AuthStatus::from_account(&response),
            Err(e) => {
                debug!(error = %e, "Account check failed");
                AuthStatus::NotLoggedIn
            }
        };

        self.account.lock().status = status.clone();
        status
    }

    /// Starts a browser login and returns the URL to open.
    ///
    /// The login stays pending until the server reports completion or
    /// [`cancel_login`](Self::cancel_login) is called.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error.
    pub async fn login_with_chatgpt(&self) -> Result<Option<String>> {
        let response: LoginStartResponse = self
            .client
            .request(Method::AccountLoginStart, &LoginStartParams::ChatGpt)
            .await?;

        if response.kind != "chatgpt" {
            return Ok(None);
        }

        let mut account = self.account.lock();
        account.login_completed = false;
        account.pending_login_id = response.login_id;
        account.auth_url = response.auth_url.clone();
        Ok(response.auth_url)
    }

    /// Logs in with an API key, then refreshes the auth status.
    ///
    /// # Errors
    ///
    /// Any [`RpcClient::request`] error from `account/login/start`.
    pub async fn login_with_api_key(&self, api_key: &str) -> Result<AuthStatus> {
        let params = LoginStartParams::ApiKey {
            api_key: api_key.to_string(),
        };
        self.client
            .request::<_, LoginStartResponse>(Method::AccountLoginStart, &params)
            .await?;
        Ok(self.check_auth().await)
    }

    /// Cancels a pending browser login. Failures are dropped.
    pub async fn cancel_login(&self) {
        let Some(login_id) = self.account.lock().pending_login_id.take() else {
            return;
        };

        let params = CancelLoginParams { login_id };
        if let Err(e) = self
            .client
            .request::<_, Value>(Method::AccountLoginCancel, &params)
            .await
        {
            debug!(error = %e, "Login cancel failed");
        }
        self.account.lock().auth_url = None;
    }

    /// `account/logout`. Local auth state is cleared even if the call fails.
    pub async fn logout(&self) {
        if let Err(e) = self
            .client
            .request::<_, Value>(Method::AccountLogout, &json!({}))
            .await
        {
            debug!(error = %e, "Logout failed");
        }

        let mut account = self.account.lock();
        account.status = AuthStatus::NotLoggedIn;
        account.pending_login_id = None;
        account.auth_url = None;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::bootstrap::{BootstrapOptions, CommandOutput};
    use crate::testing::{ServerPeer, TestServer, init_tracing};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::REMOTE
            .with_max_attempts(attempts)
            .with_retry_delay(Duration::from_millis(10))
            .with_initialize_timeout(Duration::from_millis(500))
            .with_attempt_timeout(Duration::from_secs(2))
    }

    async fn answer_initialize(peer: &mut ServerPeer) {
        let request = peer.recv_json().await.expect("initialize");
        assert_eq!(request["method"], "initialize");
        assert_eq!(request["params"]["clientInfo"]["name"], "Litter");
        peer.send_json(&json!({"id": request["id"], "result": {"userAgent": "test/1.0"}}))
            .await
            .expect("reply");
    }

    async fn connected() -> (Arc<ServerConnection>, ServerPeer) {
        init_tracing();
        let server = TestServer::bind().await;
        let session = Arc::new(
            ServerConnection::new(ConnectionTarget::remote("127.0.0.1", server.port()))
                .with_retry_policy(fast_policy(1)),
        );

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };

        let mut peer = server.accept().await.expect("accept");
        answer_initialize(&mut peer).await;
        task.await.expect("join").expect("connect");

        (session, peer)
    }

    #[tokio::test]
    async fn test_connect_remote_initializes() {
        let (session, _peer) = connected().await;

        assert!(session.is_connected());
        assert!(
            session
                .url()
                .is_some_and(|url| url.starts_with("ws://127.0.0.1:"))
        );
    }

    #[tokio::test]
    async fn test_connect_retries_after_dropped_attempt() {
        let server = TestServer::bind().await;
        let session = Arc::new(
            ServerConnection::new(ConnectionTarget::remote("127.0.0.1", server.port()))
                .with_retry_policy(fast_policy(3)),
        );

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };

        let mut first = server.accept().await.expect("first accept");
        let request = first.recv_json().await.expect("first initialize");
        assert_eq!(request["method"], "initialize");
        drop(first);

        let mut second = server.accept().await.expect("second accept");
        answer_initialize(&mut second).await;

        task.await.expect("join").expect("connect");
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_surfaces_last_error() {
        let port = TestServer::unused_port().await;
        let session = ServerConnection::new(ConnectionTarget::remote("127.0.0.1", port))
            .with_retry_policy(fast_policy(2));

        let err = session.connect().await.unwrap_err();
        assert!(err.is_connection_error(), "unexpected error: {err}");
        assert!(!session.is_connected());
        assert!(session.url().is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_blank_host() {
        let session = ServerConnection::new(ConnectionTarget::remote("  ", 8390));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[tokio::test]
    async fn test_ssh_target_needs_bootstrap() {
        let session = ServerConnection::new(ConnectionTarget::ssh("box"));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(session.retry_policy(), RetryPolicy::LAUNCHED);
    }

    struct FixedBridge(u16);

    #[async_trait]
    impl LocalServerBridge for FixedBridge {
        async fn start(&self) -> Result<u16> {
            Ok(self.0)
        }

        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn test_local_target_uses_bridge() {
        let server = TestServer::bind().await;
        let session = Arc::new(
            ServerConnection::new(ConnectionTarget::Local)
                .with_bridge(Arc::new(FixedBridge(server.port())))
                .with_retry_policy(fast_policy(1)),
        );

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };
        let mut peer = server.accept().await.expect("accept");
        answer_initialize(&mut peer).await;
        task.await.expect("join").expect("connect");

        assert_eq!(session.url(), Some(local_url(server.port())));
    }

    #[tokio::test]
    async fn test_local_target_without_bridge() {
        let session = ServerConnection::new(ConnectionTarget::Local);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Bridge { .. }));
    }

    struct ListeningShell;

    #[async_trait]
    impl RemoteShell for ListeningShell {
        async fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
            if command.contains("command -v codex") {
                Ok(CommandOutput::success("codex:/usr/bin/codex"))
            } else if command.contains("lsof") {
                Ok(CommandOutput::success("4242\n"))
            } else {
                Ok(CommandOutput::default())
            }
        }
    }

    #[tokio::test]
    async fn test_connect_via_bootstrap_adopts_running_server() {
        let server = TestServer::bind().await;
        let session = Arc::new(
            ServerConnection::new(ConnectionTarget::ssh("127.0.0.1"))
                .with_retry_policy(fast_policy(1)),
        );

        let task = {
            let session = Arc::clone(&session);
            let port = server.port();
            tokio::spawn(async move {
                let mut bootstrap = RemoteBootstrap::new(ListeningShell)
                    .with_options(BootstrapOptions::new().with_default_port(port));
                session.connect_via_bootstrap(&mut bootstrap).await
            })
        };

        let mut peer = server.accept().await.expect("accept");
        answer_initialize(&mut peer).await;

        let port = task.await.expect("join").expect("bootstrap and connect");
        assert_eq!(port, server.port());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_via_bootstrap_rejects_remote_target() {
        let session = ServerConnection::new(ConnectionTarget::remote("h", 1));
        let mut bootstrap = RemoteBootstrap::new(ListeningShell);
        let err = session
            .connect_via_bootstrap(&mut bootstrap)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn test_start_thread_falls_back_without_linux_sandbox() {
        let (session, mut peer) = connected().await;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .start_thread(ThreadStartParams {
                        cwd: Some("/repo".into()),
                        ..Default::default()
                    })
                    .await
            })
        };

        let first = peer.recv_json().await.expect("first start");
        assert_eq!(first["method"], "thread/start");
        assert_eq!(first["params"]["sandbox"], "workspace-write");
        assert_eq!(first["params"]["approvalPolicy"], "never");
        peer.send_json(&json!({
            "id": first["id"],
            "error": {"code": -32000, "message": "Codex-Linux-Sandbox was required but not provided"}
        }))
        .await
        .expect("error reply");

        let second = peer.recv_json().await.expect("second start");
        assert_eq!(second["params"]["sandbox"], "danger-full-access");
        assert_eq!(second["params"]["cwd"], "/repo");
        peer.send_json(&json!({
            "id": second["id"],
            "result": {"thread": {"id": "t1"}, "model": "gpt-5", "cwd": "/repo"}
        }))
        .await
        .expect("result");

        let response = task.await.expect("join").expect("start");
        assert_eq!(response.thread.id, "t1");
    }

    #[tokio::test]
    async fn test_pinned_sandbox_does_not_fall_back() {
        let (session, mut peer) = connected().await;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .resume_thread(ThreadResumeParams {
                        thread_id: "t1".into(),
                        sandbox: Some("read-only".into()),
                        ..Default::default()
                    })
                    .await
            })
        };

        let request = peer.recv_json().await.expect("resume");
        assert_eq!(request["method"], "thread/resume");
        assert_eq!(request["params"]["sandbox"], "read-only");
        peer.send_json(&json!({
            "id": request["id"],
            "error": {"code": -32000, "message": "missing codex-linux-sandbox executable path"}
        }))
        .await
        .expect("error reply");

        let err = task.await.expect("join").unwrap_err();
        assert!(is_missing_sandbox_error(&err));
        assert_eq!(session.client().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_swallows_errors() {
        let (session, mut peer) = connected().await;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.interrupt("t1").await })
        };

        let request = peer.recv_json().await.expect("interrupt");
        assert_eq!(request["method"], "turn/interrupt");
        assert_eq!(request["params"], json!({"threadId": "t1"}));
        peer.send_json(&json!({"id": request["id"], "error": {"code": 1, "message": "no turn"}}))
            .await
            .expect("error reply");

        task.await.expect("join");
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_list_models_params() {
        let (session, mut peer) = connected().await;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.list_models().await })
        };

        let request = peer.recv_json().await.expect("model/list");
        assert_eq!(request["params"], json!({"limit": 50, "includeHidden": false}));
        peer.send_json(&json!({"id": request["id"], "result": {"data": [{"id": "m", "model": "gpt-5"}]}}))
            .await
            .expect("result");

        let models = task.await.expect("join").expect("models");
        assert_eq!(models.data.len(), 1);
        assert_eq!(models.data[0].model, "gpt-5");
    }

    #[tokio::test]
    async fn test_check_auth_maps_account() {
        let (session, mut peer) = connected().await;
        assert_eq!(session.auth_status(), AuthStatus::Unknown);

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.check_auth().await })
        };

        let request = peer.recv_json().await.expect("account/read");
        assert_eq!(request["method"], "account/read");
        assert_eq!(request["params"], json!({"refreshToken": false}));
        peer.send_json(&json!({
            "id": request["id"],
            "result": {"account": {"type": "chatgpt", "email": "dev@example.com"}}
        }))
        .await
        .expect("result");

        let status = task.await.expect("join");
        assert_eq!(
            status,
            AuthStatus::ChatGpt {
                email: "dev@example.com".into()
            }
        );
        assert!(session.auth_status().is_logged_in());
    }

    #[tokio::test]
    async fn test_chatgpt_login_then_cancel() {
        let (session, mut peer) = connected().await;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.login_with_chatgpt().await })
        };
        let request = peer.recv_json().await.expect("login start");
        assert_eq!(request["params"], json!({"type": "chatgpt"}));
        peer.send_json(&json!({
            "id": request["id"],
            "result": {"type": "chatgpt", "loginId": "L1", "authUrl": "https://auth.example/x"}
        }))
        .await
        .expect("result");

        let url = task.await.expect("join").expect("login");
        assert_eq!(url.as_deref(), Some("https://auth.example/x"));
        assert_eq!(session.auth_url(), url);

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.cancel_login().await })
        };
        let cancel = peer.recv_json().await.expect("cancel");
        assert_eq!(cancel["method"], "account/login/cancel");
        assert_eq!(cancel["params"], json!({"loginId": "L1"}));
        peer.send_json(&json!({"id": cancel["id"], "result": {}}))
            .await
            .expect("result");

        task.await.expect("join");
        assert!(session.auth_url().is_none());
    }

    #[tokio::test]
    async fn test_login_completed_notification_clears_pending_login() {
        let (session, mut peer) = connected().await;
        {
            let mut account = session.account.lock();
            account.pending_login_id = Some("L2".into());
            account.auth_url = Some("https://auth.example/y".into());
        }

        peer.send_json(&json!({
            "method": "account/login/completed",
            "params": {"loginId": "L2", "success": true}
        }))
        .await
        .expect("notify");

        let deadline = tokio::time::Instant::now() + crate::testing::TEST_WAIT;
        while !session.login_completed() && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }

        assert!(session.login_completed());
        assert!(session.auth_url().is_none());
        assert!(session.account.lock().pending_login_id.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_state_even_on_error() {
        let (session, mut peer) = connected().await;
        session.account.lock().status = AuthStatus::ApiKey;

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.logout().await })
        };
        let request = peer.recv_json().await.expect("logout");
        assert_eq!(request["method"], "account/logout");
        peer.send_json(&json!({"id": request["id"], "error": {"code": 1, "message": "nope"}}))
            .await
            .expect("error reply");

        task.await.expect("join");
        assert_eq!(session.auth_status(), AuthStatus::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_respond_to_server_request() {
        let (session, mut peer) = connected().await;

        session
            .respond_to_server_request(&json!(7), json!({"decision": "decline"}))
            .await
            .expect("reply");

        let reply = peer.recv_json().await.expect("reply");
        assert_eq!(
            reply,
            json!({"jsonrpc": "2.0", "id": 7, "result": {"decision": "decline"}})
        );
    }

    #[test]
    fn test_is_missing_sandbox_error() {
        assert!(is_missing_sandbox_error(&Error::rpc(
            -32000,
            "spawn failed: missing codex-linux-sandbox executable path"
        )));
        assert!(!is_missing_sandbox_error(&Error::rpc(-32000, "other")));
        assert!(!is_missing_sandbox_error(&Error::ConnectionClosed));
    }

    #[test]
    fn test_account_updated_keeps_email() {
        let mut state = AccountState {
            status: AuthStatus::ChatGpt {
                email: "a@b.c".into(),
            },
            ..Default::default()
        };
        state.apply(&ParsedNotification::AccountUpdated {
            auth_mode: Some("chatgpt".into()),
        });
        assert_eq!(
            state.status,
            AuthStatus::ChatGpt {
                email: "a@b.c".into()
            }
        );

        state.apply(&ParsedNotification::AccountUpdated { auth_mode: None });
        assert_eq!(state.status, AuthStatus::NotLoggedIn);
    }
}
