//! JSON-RPC 2.0 client over a [`Connection`].
//!
//! [`RpcClient`] allocates request ids, keeps the pending table and routes
//! inbound messages:
//!
//! | Inbound shape | Destination |
//! |---------------|-------------|
//! | Response | The pending call with the same id, or dropped |
//! | Notification | Every notification handler, in registration order |
//! | Server request | Server-request handlers until one claims it |
//! | Anything else | Dropped |
//!
//! The client never times calls out on its own; use
//! [`RpcClient::call_with_timeout`] or cancel through [`PendingCall`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{IdAllocator, RequestId};
use crate::protocol::{
    InboundEnvelope, Method, Notification, OutgoingError, OutgoingRequest, OutgoingResult,
    RpcErrorObject, ServerRequest,
};
use crate::transport::{ConnectOptions, Connection, ConnectionState, DisconnectReason, InboundSink};

use super::pending::{PendingCall, PendingTable};

// ============================================================================
// Handler Types
// ============================================================================

/// Notification callback.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Server-request callback.
///
/// Return `true` to claim the request; the claimer must later answer it
/// with [`RpcClient::send_result`] or [`RpcClient::send_error`].
pub type ServerRequestHandler = Arc<dyn Fn(&ServerRequest) -> bool + Send + Sync>;

/// Disconnect callback.
pub type DisconnectHandler = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

// ============================================================================
// Dispatcher
// ============================================================================

/// Inbound side: pending table plus registered handlers.
#[derive(Default)]
struct Dispatcher {
    pending: Arc<PendingTable>,
    notification_handlers: Mutex<Vec<NotificationHandler>>,
    server_request_handlers: Mutex<Vec<ServerRequestHandler>>,
    disconnect_handlers: Mutex<Vec<DisconnectHandler>>,
}

impl Dispatcher {
    fn dispatch_notification(&self, notification: &Notification) {
        let handlers = self.notification_handlers.lock().clone();
        trace!(method = %notification.method, handlers = handlers.len(), "Notification");

        for handler in handlers {
            handler(notification);
        }
    }

    fn dispatch_server_request(&self, request: &ServerRequest) -> Option<String> {
        let handlers = self.server_request_handlers.lock().clone();

        if handlers.iter().any(|handler| handler(request)) {
            return None;
        }

        debug!(method = %request.method, "Unclaimed server request, answering with empty result");
        let empty = json!({});
        serde_json::to_string(&OutgoingResult::new(&request.id, &empty)).ok()
    }
}

impl InboundSink for Dispatcher {
    fn on_text(&self, text: String) -> Option<String> {
        let Some(envelope) = InboundEnvelope::parse(&text) else {
            warn!(len = text.len(), "Dropping unrecognized message");
            return None;
        };

        match envelope {
            InboundEnvelope::Response { id, outcome } => {
                if !self.pending.resolve(&id, outcome.map_err(Error::from)) {
                    debug!(%id, "Response for unknown request");
                }
                None
            }
            InboundEnvelope::Notification(notification) => {
                self.dispatch_notification(&notification);
                None
            }
            InboundEnvelope::ServerRequest(request) => self.dispatch_server_request(&request),
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        match &reason {
            DisconnectReason::Requested => self.pending.fail_all(|| Error::Cancelled),
            DisconnectReason::ClosedByPeer => self.pending.fail_all(|| Error::ConnectionClosed),
            DisconnectReason::Failed(message) => {
                self.pending.fail_all(|| Error::connection(message.clone()))
            }
        };

        let handlers = self.disconnect_handlers.lock().clone();
        for handler in handlers {
            handler(&reason);
        }
    }
}

// ============================================================================
// RpcClient
// ============================================================================

/// JSON-RPC client bound to one transport connection.
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::new();
/// client.on_notification(|n| println!("{}", n.method));
/// client.connect("ws://127.0.0.1:8390").await?;
///
/// let models = client.call("model/list", json!({})).await?;
/// client.disconnect().await;
/// ```
pub struct RpcClient {
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    ids: IdAllocator,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection", &self.connection)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Creates a disconnected client with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ConnectOptions::new())
    }

    /// Creates a disconnected client.
    #[must_use]
    pub fn with_options(options: ConnectOptions) -> Self {
        let dispatcher = Arc::new(Dispatcher::default());
        let sink: Arc<dyn InboundSink> = Arc::clone(&dispatcher) as Arc<dyn InboundSink>;

        Self {
            connection: Connection::new(sink, options),
            dispatcher,
            ids: IdAllocator::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Connects the underlying transport.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub async fn connect(&self, url: &str) -> Result<()> {
        self.connection.connect(url).await
    }

    /// Closes the transport and cancels every pending call.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.dispatcher.pending.fail_all(|| Error::Cancelled);
    }

    /// Returns `true` while the transport is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Returns the transport state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// Registers a notification handler.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.dispatcher
            .notification_handlers
            .lock()
            .push(Arc::new(handler));
    }

    /// Registers a server-request handler.
    pub fn on_server_request<F>(&self, handler: F)
    where
        F: Fn(&ServerRequest) -> bool + Send + Sync + 'static,
    {
        self.dispatcher
            .server_request_handlers
            .lock()
            .push(Arc::new(handler));
    }

    /// Registers a disconnect handler.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.dispatcher
            .disconnect_handlers
            .lock()
            .push(Arc::new(handler));
    }

    /// Removes every registered handler.
    pub fn clear_handlers(&self) {
        self.dispatcher.notification_handlers.lock().clear();
        self.dispatcher.server_request_handlers.lock().clear();
        self.dispatcher.disconnect_handlers.lock().clear();
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Sends a request and returns a handle to its outcome.
    ///
    /// The pending entry exists before the frame is written, so a fast
    /// response is never missed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] or [`Error::Io`] if the request
    /// could not be written; nothing stays pending in that case.
    pub async fn start_call(&self, method: &str, params: Value) -> Result<PendingCall> {
        let id = self.ids.next_id();
        let text = serde_json::to_string(&OutgoingRequest::new(&id, method, &params))?;

        let rx = self.dispatcher.pending.register(id.clone(), method)?;
        let call = PendingCall::new(id, rx, Arc::clone(&self.dispatcher.pending));

        trace!(id = %call.id(), method, "Sending request");
        self.connection.send(text).await?;

        Ok(call)
    }

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the server answered with an error
    /// - [`Error::Cancelled`] if cancelled or disconnected locally
    /// - [`Error::ConnectionClosed`] / [`Error::Connection`] if the connection dropped
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.start_call(method, params).await?.wait().await
    }

    /// Like [`call`](Self::call), giving up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] on expiry, otherwise as [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> Result<Value> {
        let call = self.start_call(method, params).await?;
        timeout(limit, call.wait())
            .await
            .map_err(|_| Error::timeout(method, limit.as_millis() as u64))?
    }

    /// Typed call for one of the known methods.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`Error::Json`] if params or result do
    /// not (de)serialize.
    pub async fn request<P, R>(&self, method: Method, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method.as_str(), params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Typed call with a timeout.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request) and [`call_with_timeout`](Self::call_with_timeout).
    pub async fn request_with_timeout<P, R>(
        &self,
        method: Method,
        params: &P,
        limit: Duration,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self
            .call_with_timeout(method.as_str(), params, limit)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Cancels the call `id`; returns `false` if it is not pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.dispatcher.pending.cancel(id)
    }

    /// Returns the number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending.len()
    }

    // ------------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------------

    /// Answers a server request with `result`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] or [`Error::Io`] if the reply
    /// could not be written.
    pub async fn send_result(&self, id: &Value, result: Value) -> Result<()> {
        let text = serde_json::to_string(&OutgoingResult::new(id, &result))?;
        self.connection.send(text).await
    }

    /// Answers a server request with a JSON-RPC error.
    ///
    /// # Errors
    ///
    /// As [`send_result`](Self::send_result).
    pub async fn send_error(&self, id: &Value, code: i64, message: impl Into<String>) -> Result<()> {
        let error = RpcErrorObject::new(code, message);
        let text = serde_json::to_string(&OutgoingError::new(id, error))?;
        self.connection.send(text).await
    }
}

// ============================================================================
// Tests
// ============================================================================
