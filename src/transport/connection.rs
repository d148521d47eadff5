//! WebSocket connection and receive loop.
//!
//! A [`Connection`] owns at most one live socket. `connect` runs TCP connect
//! and the upgrade handshake, then spawns an event loop task that exclusively
//! owns the stream. Callers talk to the loop through a command queue, so
//! concurrent `send` calls never interleave partial frames.
//!
//! # Event Loop
//!
//! The spawned task handles:
//!
//! - Socket reads into a byte accumulator, parsed frame by frame
//! - Fragment reassembly and UTF-8 validation of text messages
//! - Ping replies and close echoes
//! - Outgoing text frames queued by [`Connection::send`]
//!
//! Text messages go to the [`InboundSink`]. The sink sees exactly one
//! [`InboundSink::on_disconnect`] per established connection, whichever way
//! the loop ends.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};
use url::{Host, Url};

use crate::error::{Error, Result};

use super::frame::{Frame, OpCode, ParseOutcome, encode_frame, try_parse_frame_limited};
use super::handshake::perform_handshake;
use super::options::ConnectOptions;

// ============================================================================
// Constants
// ============================================================================

/// Initial capacity of the read accumulator.
const READ_BUFFER_CAPACITY: usize = 16 * 1024;

/// Only plain WebSocket is supported.
const WS_SCHEME: &str = "ws";

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Upgrade handshake in progress.
    Handshaking,
    /// Receive loop running.
    Open,
    /// Teardown in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

// ============================================================================
// DisconnectReason
// ============================================================================

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Local `disconnect`, reconnect, or drop.
    Requested,
    /// Server sent a close frame or ended the stream.
    ClosedByPeer,
    /// Socket or frame error.
    Failed(String),
}

// ============================================================================
// InboundSink
// ============================================================================

/// Receiver of decoded inbound traffic.
///
/// Called from the receive loop task. Implementations must not block.
pub trait InboundSink: Send + Sync + 'static {
    /// Handles one complete text message.
    ///
    /// Return `Some(text)` to have the loop send a reply frame.
    fn on_text(&self, text: String) -> Option<String>;

    /// Called once when an established connection ends.
    fn on_disconnect(&self, reason: DisconnectReason);
}

/// Fires [`InboundSink::on_disconnect`] at most once per connection.
struct DisconnectSignal {
    fired: AtomicBool,
    sink: Arc<dyn InboundSink>,
}

impl DisconnectSignal {
    fn new(sink: Arc<dyn InboundSink>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            sink,
        }
    }

    fn fire(&self, reason: DisconnectReason) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            debug!(?reason, "Connection ended");
            self.sink.on_disconnect(reason);
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A parsed `ws://` URL with the TCP target extracted.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// URL used for the request line and `Host` header.
    pub url: Url,
    /// Host without IPv6 brackets.
    pub host: String,
    /// Explicit or default (80) port.
    pub port: u16,
    /// Numeric IPv6 scope id from a `%25` zone suffix.
    pub scope_id: Option<u32>,
}

impl Endpoint {
    /// Parses `raw`, accepting only the `ws` scheme.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::UnsupportedScheme`] for anything but `ws`
    /// - [`Error::Connection`] if the URL has no host
    pub fn parse(raw: &str) -> Result<Self> {
        let (stripped, zone) = split_zone(raw.trim());
        let url = Url::parse(&stripped)?;

        if url.scheme() != WS_SCHEME {
            return Err(Error::unsupported_scheme(url.scheme()));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::connection(format!("URL has no host: {raw}"))),
        };

        let port = url.port_or_known_default().unwrap_or(80);
        let scope_id = zone.and_then(|zone| zone.parse().ok());

        Ok(Self {
            url,
            host,
            port,
            scope_id,
        })
    }

    /// Opens the TCP stream.
    async fn open_tcp(&self) -> std::io::Result<TcpStream> {
        if let (Some(scope_id), Ok(addr)) = (self.scope_id, self.host.parse::<Ipv6Addr>()) {
            let target = SocketAddr::V6(SocketAddrV6::new(addr, self.port, 0, scope_id));
            return TcpStream::connect(target).await;
        }
        TcpStream::connect((self.host.as_str(), self.port)).await
    }
}

/// Removes a `%zone` suffix inside IPv6 brackets, returning it separately.
fn split_zone(raw: &str) -> (Cow<'_, str>, Option<String>) {
    let (Some(open), Some(close)) = (raw.find('['), raw.find(']')) else {
        return (Cow::Borrowed(raw), None);
    };
    if close < open {
        return (Cow::Borrowed(raw), None);
    }

    let inside = &raw[open + 1..close];
    let Some(pct) = inside.find('%') else {
        return (Cow::Borrowed(raw), None);
    };

    let zone = &inside[pct..];
    let zone = zone
        .strip_prefix("%25")
        .or_else(|| zone.strip_prefix('%'))
        .unwrap_or(zone);

    let stripped = format!("{}{}", &raw[..open + 1 + pct], &raw[close..]);
    (Cow::Owned(stripped), Some(zone.to_string()))
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write one text frame.
    Send {
        text: String,
        done_tx: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and stop.
    Shutdown,
}

/// The running loop of an established connection.
struct ActiveLink {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    task: JoinHandle<()>,
    signal: Arc<DisconnectSignal>,
}

/// Puts the state back to `Disconnected` when a connect attempt fails or is
/// dropped before the loop starts.
struct StateReset<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl<'a> StateReset<'a> {
    fn new(state: &'a Mutex<ConnectionState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = ConnectionState::Disconnected;
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Client side of one WebSocket connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`; share it behind an `Arc`. `connect` and
/// `disconnect` are serialized internally, `send` may be called from any
/// number of tasks.
pub struct Connection {
    /// Limits and timeouts.
    options: ConnectOptions,
    /// Current lifecycle state (shared with the event loop).
    state: Arc<Mutex<ConnectionState>>,
    /// The live loop, if any.
    link: Mutex<Option<ActiveLink>>,
    /// Serializes connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    /// Receiver of inbound messages.
    sink: Arc<dyn InboundSink>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a disconnected connection delivering to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn InboundSink>, options: ConnectOptions) -> Self {
        Self {
            options,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            link: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            sink,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Returns `true` while the receive loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the options in use.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Connects to `url` (`ws://host:port/path?query`).
    ///
    /// Any previous connection on this instance is torn down first.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedScheme`] / [`Error::Url`] for a bad URL
    /// - [`Error::ConnectionTimeout`] if TCP connect exceeds the timeout
    /// - [`Error::Connection`] if TCP connect fails
    /// - [`Error::Timeout`] if the handshake exceeds the timeout
    /// - [`Error::HandshakeRejected`] / [`Error::HandshakeTooLarge`] from the upgrade
    pub async fn connect(&self, url: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;

        let mut reset = StateReset::new(&self.state);
        let endpoint = Endpoint::parse(url)?;
        let result = self.establish(&endpoint).await;

        match &result {
            Ok(()) => reset.disarm(),
            Err(e) => warn!(url = %endpoint.url, error = %e, "WebSocket connect failed"),
        }
        result
    }

    async fn establish(&self, endpoint: &Endpoint) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let connect_timeout = self.options.connect_timeout;
        let mut stream = timeout(connect_timeout, endpoint.open_tcp())
            .await
            .map_err(|_| Error::connection_timeout(connect_timeout.as_millis() as u64))?
            .map_err(|e| {
                Error::connection(format!("{}:{}: {e}", endpoint.host, endpoint.port))
            })?;
        let _ = stream.set_nodelay(true);

        self.set_state(ConnectionState::Handshaking);

        let handshake_timeout = self.options.handshake_timeout;
        let leftover = timeout(
            handshake_timeout,
            perform_handshake(&mut stream, &endpoint.url, self.options.max_handshake_size),
        )
        .await
        .map_err(|_| Error::timeout("websocket handshake", handshake_timeout.as_millis() as u64))??;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let signal = Arc::new(DisconnectSignal::new(Arc::clone(&self.sink)));

        self.set_state(ConnectionState::Open);

        let task = tokio::spawn(run_event_loop(
            stream,
            leftover,
            command_rx,
            Arc::clone(&signal),
            Arc::clone(&self.state),
            self.options.max_message_size,
        ));

        *self.link.lock() = Some(ActiveLink {
            command_tx,
            task,
            signal,
        });

        debug!(url = %endpoint.url, "WebSocket connection established");
        Ok(())
    }

    /// Queues `text` as one text frame and waits until it is written.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if there is no open connection
    /// - [`Error::Io`] if the socket write fails
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        let command_tx = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.command_tx.clone())
            .ok_or(Error::ConnectionClosed)?;

        let (done_tx, done_rx) = oneshot::channel();
        command_tx
            .send(ConnectionCommand::Send {
                text: text.into(),
                done_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Sends a close frame, stops the receive loop and releases the socket.
    ///
    /// No-op when already disconnected.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };

        self.set_state(ConnectionState::Closing);
        let _ = link.command_tx.send(ConnectionCommand::Shutdown);

        let mut task = link.task;
        if timeout(self.options.close_timeout, &mut task).await.is_err() {
            warn!("Receive loop did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }

        link.signal.fire(DisconnectReason::Requested);
        self.set_state(ConnectionState::Disconnected);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Runs until close, error, or shutdown, then fires the disconnect signal.
async fn run_event_loop<S>(
    stream: S,
    leftover: Vec<u8>,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    signal: Arc<DisconnectSignal>,
    state: Arc<Mutex<ConnectionState>>,
    max_message_size: usize,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let mut buffer = leftover;
    buffer.reserve(READ_BUFFER_CAPACITY);
    let mut assembler = MessageAssembler::new(max_message_size);

    let reason = loop {
        match drain_frames(&mut buffer, &mut assembler, &mut writer, &signal.sink, max_message_size)
            .await
        {
            Ok(None) => {}
            Ok(Some(reason)) => break reason,
            Err(e) => {
                error!(error = %e, "Receive loop failed");
                break DisconnectReason::Failed(e.to_string());
            }
        }

        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => {
                        debug!("WebSocket stream ended");
                        break DisconnectReason::ClosedByPeer;
                    }
                    Ok(n) => trace!(bytes = n, "Read from socket"),
                    Err(e) => {
                        error!(error = %e, "WebSocket read error");
                        break DisconnectReason::Failed(e.to_string());
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Send { text, done_tx }) => {
                        let result = write_frame(&mut writer, OpCode::Text, text.as_bytes()).await;
                        let failure = result.as_ref().err().map(ToString::to_string);
                        let _ = done_tx.send(result);

                        if let Some(message) = failure {
                            break DisconnectReason::Failed(message);
                        }
                    }

                    Some(ConnectionCommand::Shutdown) => {
                        debug!("Shutdown command received");
                        let _ = write_frame(&mut writer, OpCode::Close, &[]).await;
                        break DisconnectReason::Requested;
                    }

                    None => {
                        debug!("Command channel closed");
                        let _ = write_frame(&mut writer, OpCode::Close, &[]).await;
                        break DisconnectReason::Requested;
                    }
                }
            }
        }
    };

    let _ = writer.shutdown().await;

    // Fail queued sends instead of dropping them silently.
    command_rx.close();
    while let Ok(command) = command_rx.try_recv() {
        if let ConnectionCommand::Send { done_tx, .. } = command {
            let _ = done_tx.send(Err(Error::ConnectionClosed));
        }
    }

    *state.lock() = ConnectionState::Disconnected;
    signal.fire(reason);

    debug!("Event loop terminated");
}

/// Parses and dispatches every complete frame in `buffer`.
///
/// Returns `Some(reason)` when a close frame ends the connection.
async fn drain_frames<W>(
    buffer: &mut Vec<u8>,
    assembler: &mut MessageAssembler,
    writer: &mut W,
    sink: &Arc<dyn InboundSink>,
    max_message_size: usize,
) -> Result<Option<DisconnectReason>>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let (frame, consumed) = match try_parse_frame_limited(buffer, max_message_size)? {
            ParseOutcome::Frame { frame, consumed } => (frame, consumed),
            ParseOutcome::NeedMoreData => return Ok(None),
        };
        buffer.drain(..consumed);

        match frame.opcode {
            OpCode::Ping => {
                trace!(len = frame.payload.len(), "Ping received");
                write_frame(writer, OpCode::Pong, &frame.payload).await?;
            }

            OpCode::Pong => trace!("Pong received"),

            OpCode::Close => {
                debug!("WebSocket closed by remote");
                let _ = write_frame(writer, OpCode::Close, &[]).await;
                return Ok(Some(DisconnectReason::ClosedByPeer));
            }

            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let Some((opcode, payload)) = assembler.push(frame)? else {
                    continue;
                };

                if opcode == OpCode::Binary {
                    debug!(len = payload.len(), "Ignoring binary message");
                    continue;
                }

                match String::from_utf8(payload) {
                    Ok(text) => {
                        if let Some(reply) = sink.on_text(text) {
                            write_frame(writer, OpCode::Text, reply.as_bytes()).await?;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping text message with invalid UTF-8"),
                }
            }
        }
    }
}

/// Writes one masked frame and flushes.
async fn write_frame<W>(writer: &mut W, opcode: OpCode, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(opcode, payload)).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// MessageAssembler
// ============================================================================

/// Joins fragmented data frames into whole messages.
#[derive(Debug)]
struct MessageAssembler {
    /// Opcode of the message in progress.
    opcode: Option<OpCode>,
    /// Payload collected so far.
    payload: Vec<u8>,
    /// Cap on the joined payload.
    max_size: usize,
}

impl MessageAssembler {
    fn new(max_size: usize) -> Self {
        Self {
            opcode: None,
            payload: Vec::new(),
            max_size,
        }
    }

    /// Adds a data frame, returning the message once its final frame arrives.
    fn push(&mut self, frame: Frame) -> Result<Option<(OpCode, Vec<u8>)>> {
        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::frame("continuation frame without a message in progress"));
            }
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                return Err(Error::frame("new data frame before previous message finished"));
            }
            (OpCode::Text | OpCode::Binary, None) if frame.fin => {
                return Ok(Some((frame.opcode, frame.payload)));
            }
            (OpCode::Text | OpCode::Binary, None) => {
                self.opcode = Some(frame.opcode);
            }
            _ => {}
        }

        let total = self.payload.len() + frame.payload.len();
        if total > self.max_size {
            self.opcode = None;
            self.payload.clear();
            return Err(Error::frame_too_large(total as u64, self.max_size as u64));
        }
        self.payload.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let payload = std::mem::take(&mut self.payload);
        Ok(self.opcode.take().map(|opcode| (opcode, payload)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::testing::{TestServer, recv_within};

    /// Forwards everything to channels; optionally answers one text.
    struct RecordingSink {
        texts: mpsc::UnboundedSender<String>,
        disconnects: mpsc::UnboundedSender<DisconnectReason>,
        reply_to: Option<(String, String)>,
    }

    impl InboundSink for RecordingSink {
        fn on_text(&self, text: String) -> Option<String> {
            let reply = self
                .reply_to
                .as_ref()
                .filter(|(trigger, _)| *trigger == text)
                .map(|(_, reply)| reply.clone());
            let _ = self.texts.send(text);
            reply
        }

        fn on_disconnect(&self, reason: DisconnectReason) {
            let _ = self.disconnects.send(reason);
        }
    }

    struct Harness {
        connection: Connection,
        texts: mpsc::UnboundedReceiver<String>,
        disconnects: mpsc::UnboundedReceiver<DisconnectReason>,
    }

    fn harness_with_reply(reply_to: Option<(&str, &str)>) -> Harness {
        let (texts_tx, texts) = mpsc::unbounded_channel();
        let (disconnects_tx, disconnects) = mpsc::unbounded_channel();
        let sink = RecordingSink {
            texts: texts_tx,
            disconnects: disconnects_tx,
            reply_to: reply_to.map(|(a, b)| (a.to_string(), b.to_string())),
        };
        let options = ConnectOptions::new().with_close_timeout(Duration::from_secs(1));

        Harness {
            connection: Connection::new(Arc::new(sink), options),
            texts,
            disconnects,
        }
    }

    fn harness() -> Harness {
        harness_with_reply(None)
    }

    // ------------------------------------------------------------------------
    // Endpoint
    // ------------------------------------------------------------------------

    #[test]
    fn test_endpoint_defaults_port_80() {
        let endpoint = Endpoint::parse("ws://example.com").expect("parse");
        assert_eq!(endpoint.host, "example.com");
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.scope_id, None);
    }

    #[test]
    fn test_endpoint_ipv6_unbracketed() {
        let endpoint = Endpoint::parse("ws://[::1]:8390/").expect("parse");
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 8390);
    }

    #[test]
    fn test_endpoint_zone_is_split_off() {
        let endpoint = Endpoint::parse("ws://[fe80::1%253]:8390").expect("parse");
        assert_eq!(endpoint.host, "fe80::1");
        assert_eq!(endpoint.scope_id, Some(3));
    }

    #[test]
    fn test_endpoint_rejects_wss() {
        let err = Endpoint::parse("wss://example.com").expect_err("wss");
        assert!(matches!(err, Error::UnsupportedScheme { scheme } if scheme == "wss"));
    }

    #[test]
    fn test_split_zone_passthrough() {
        let (url, zone) = split_zone("ws://127.0.0.1:1/");
        assert_eq!(url, "ws://127.0.0.1:1/");
        assert!(zone.is_none());
    }

    // ------------------------------------------------------------------------
    // MessageAssembler
    // ------------------------------------------------------------------------

    #[test]
    fn test_assembler_single_frame() {
        let mut assembler = MessageAssembler::new(1024);
        let message = assembler.push(Frame::text("hi")).expect("push");
        assert_eq!(message, Some((OpCode::Text, b"hi".to_vec())));
    }

    #[test]
    fn test_assembler_joins_fragments() {
        let mut assembler = MessageAssembler::new(1024);
        assert_eq!(assembler.push(Frame::text("he").fragment()).expect("first"), None);
        assert_eq!(
            assembler
                .push(Frame::new(OpCode::Continuation, b"l".to_vec()).fragment())
                .expect("middle"),
            None
        );
        let message = assembler
            .push(Frame::new(OpCode::Continuation, b"lo".to_vec()))
            .expect("last");
        assert_eq!(message, Some((OpCode::Text, b"hello".to_vec())));
    }

    #[test]
    fn test_assembler_orphan_continuation() {
        let mut assembler = MessageAssembler::new(1024);
        let err = assembler
            .push(Frame::new(OpCode::Continuation, b"x".to_vec()))
            .expect_err("orphan");
        assert!(matches!(err, Error::Frame { .. }));
    }

    #[test]
    fn test_assembler_interrupted_message() {
        let mut assembler = MessageAssembler::new(1024);
        assembler.push(Frame::text("a").fragment()).expect("first");
        assert!(assembler.push(Frame::text("b")).is_err());
    }

    #[test]
    fn test_assembler_size_cap() {
        let mut assembler = MessageAssembler::new(4);
        assembler.push(Frame::text("abc").fragment()).expect("first");
        let err = assembler
            .push(Frame::new(OpCode::Continuation, b"de".to_vec()))
            .expect_err("too large");
        assert!(matches!(err, Error::FrameTooLarge { size: 5, limit: 4 }));
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_reaches_server() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        assert!(h.connection.is_open());
        h.connection.send("hello").await.expect("send");
        assert_eq!(peer.recv_text().await.expect("recv"), "hello");
    }

    #[tokio::test]
    async fn test_ping_answered_and_not_delivered() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_frame(Frame::new(OpCode::Ping, b"abc".to_vec()))
            .await
            .expect("ping");
        peer.send_text("after").await.expect("text");

        let pong = peer.recv_frame().await.expect("pong");
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload, b"abc");

        assert_eq!(recv_within(&mut h.texts).await.as_deref(), Some("after"));
        assert!(
            timeout(Duration::from_millis(200), peer.recv_frame()).await.is_err(),
            "only one pong per ping"
        );
    }

    #[tokio::test]
    async fn test_fragmented_message_with_interleaved_ping() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_frame(Frame::text("{\"a\":").fragment()).await.expect("first");
        peer.send_frame(Frame::new(OpCode::Ping, Vec::new())).await.expect("ping");
        peer.send_frame(Frame::new(OpCode::Continuation, b"1}".to_vec()))
            .await
            .expect("last");

        assert_eq!(recv_within(&mut h.texts).await.as_deref(), Some("{\"a\":1}"));
        assert_eq!(peer.recv_frame().await.expect("pong").opcode, OpCode::Pong);
    }

    #[tokio::test]
    async fn test_invalid_utf8_dropped() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_frame(Frame::new(OpCode::Text, vec![0xff, 0xfe]))
            .await
            .expect("bad");
        peer.send_text("ok").await.expect("good");

        assert_eq!(recv_within(&mut h.texts).await.as_deref(), Some("ok"));
        assert!(h.connection.is_open());
    }

    #[tokio::test]
    async fn test_leftover_handshake_bytes_are_frames() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let early = Frame::text("early").encode(None);
        let (connected, peer) = tokio::join!(
            h.connection.connect(&url),
            server.accept_with_preamble(&early)
        );
        connected.expect("connect");
        let _peer = peer.expect("accept");

        assert_eq!(recv_within(&mut h.texts).await.as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn test_sink_reply_is_sent() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness_with_reply(Some(("question", "answer")));

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_text("question").await.expect("send");
        assert_eq!(peer.recv_text().await.expect("reply"), "answer");
        assert_eq!(recv_within(&mut h.texts).await.as_deref(), Some("question"));
    }

    #[tokio::test]
    async fn test_peer_close_signals_once() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_frame(Frame::close()).await.expect("close");
        assert_eq!(peer.recv_frame().await.expect("echo").opcode, OpCode::Close);

        assert_eq!(
            recv_within(&mut h.disconnects).await,
            Some(DisconnectReason::ClosedByPeer)
        );

        h.connection.disconnect().await;
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
        assert!(h.disconnects.try_recv().is_err());
        assert!(matches!(
            h.connection.send("late").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_sends_close() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        h.connection.disconnect().await;

        assert_eq!(peer.recv_frame().await.expect("close").opcode, OpCode::Close);
        assert_eq!(
            recv_within(&mut h.disconnects).await,
            Some(DisconnectReason::Requested)
        );
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_previous() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, first) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("first connect");
        let mut first = first.expect("first accept");

        let (connected, second) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("second connect");
        let mut second = second.expect("second accept");

        assert_eq!(first.recv_frame().await.expect("close").opcode, OpCode::Close);
        assert_eq!(
            recv_within(&mut h.disconnects).await,
            Some(DisconnectReason::Requested)
        );

        h.connection.send("on second").await.expect("send");
        assert_eq!(second.recv_text().await.expect("recv"), "on second");
    }

    #[tokio::test]
    async fn test_reserved_bits_fail_connection() {
        let server = TestServer::bind().await;
        let url = server.url();
        let mut h = harness();

        let (connected, peer) = tokio::join!(h.connection.connect(&url), server.accept());
        connected.expect("connect");
        let mut peer = peer.expect("accept");

        peer.send_raw(&[0xC1, 0x00]).await.expect("raw");

        assert!(matches!(
            recv_within(&mut h.disconnects).await,
            Some(DisconnectReason::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let h = harness();
        assert!(matches!(h.connection.send("x").await, Err(Error::ConnectionClosed)));
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = TestServer::unused_port().await;
        let h = harness();

        let err = h
            .connection
            .connect(&format!("ws://127.0.0.1:{port}"))
            .await
            .expect_err("refused");
        assert!(err.is_connection_error());
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancelled_connect_resets_state() {
        // Listener completes TCP but never answers the upgrade.
        let server = TestServer::bind().await;
        let url = server.url();
        let h = harness();

        let outcome = timeout(Duration::from_millis(200), h.connection.connect(&url)).await;
        assert!(outcome.is_err());
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);

        h.connection.disconnect().await;
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(h.connection.send("x").await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_unsupported_scheme() {
        let h = harness();
        let err = h
            .connection
            .connect("http://127.0.0.1:1")
            .await
            .expect_err("scheme");
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }
}
