//! Loopback WebSocket server for tests.
//!
//! Speaks just enough server-side RFC 6455 to drive a real
//! [`Connection`](crate::transport::Connection): it answers the upgrade,
//! decodes masked client frames and writes unmasked frames back.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use crate::transport::frame::{Frame, OpCode, ParseOutcome, try_parse_frame};
use crate::transport::handshake::{HandshakeResponse, expected_accept};

/// Upper bound on any single wait in a test.
pub const TEST_WAIT: Duration = Duration::from_secs(5);

/// Routes `tracing` output through the test harness.
///
/// Filtered by `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receives from `rx`, giving up after [`TEST_WAIT`].
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    timeout(TEST_WAIT, rx.recv()).await.ok().flatten()
}

// ============================================================================
// TestServer
// ============================================================================

pub struct TestServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TestServer {
    /// Binds to an ephemeral loopback port.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        Self { listener, addr }
    }

    /// Returns a port nothing listens on.
    pub async fn unused_port() -> u16 {
        let server = Self::bind().await;
        server.port()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port())
    }

    /// Accepts one client and completes the upgrade.
    pub async fn accept(&self) -> anyhow::Result<ServerPeer> {
        self.accept_with_preamble(&[]).await
    }

    /// Like [`accept`](Self::accept), writing `preamble` in the same packet
    /// as the 101 response.
    pub async fn accept_with_preamble(&self, preamble: &[u8]) -> anyhow::Result<ServerPeer> {
        let (mut stream, _) = timeout(TEST_WAIT, self.listener.accept())
            .await
            .context("accept timed out")??;

        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = head.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let n = timeout(TEST_WAIT, stream.read(&mut chunk))
                .await
                .context("request read timed out")??;
            if n == 0 {
                bail!("client closed during handshake");
            }
            head.extend_from_slice(&chunk[..n]);
        };

        let request = HandshakeResponse::parse(&head[..header_end])?;
        let key = request
            .header("sec-websocket-key")
            .context("missing Sec-WebSocket-Key")?;

        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            expected_accept(key)
        )
        .into_bytes();
        response.extend_from_slice(preamble);
        stream.write_all(&response).await?;

        Ok(ServerPeer {
            stream,
            buffer: head.split_off(header_end + 4),
        })
    }
}

// ============================================================================
// ServerPeer
// ============================================================================

/// Server end of one accepted connection.
pub struct ServerPeer {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl ServerPeer {
    /// Reads the next frame of any kind.
    pub async fn recv_frame(&mut self) -> anyhow::Result<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let ParseOutcome::Frame { frame, consumed } = try_parse_frame(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(frame);
            }
            let n = timeout(TEST_WAIT, self.stream.read(&mut chunk))
                .await
                .context("frame read timed out")??;
            if n == 0 {
                bail!("client closed the stream");
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads frames until a text frame arrives.
    pub async fn recv_text(&mut self) -> anyhow::Result<String> {
        loop {
            let frame = self.recv_frame().await?;
            match frame.opcode {
                OpCode::Text => return Ok(String::from_utf8(frame.payload)?),
                OpCode::Close => bail!("client sent close"),
                _ => {}
            }
        }
    }

    /// Reads the next text frame as JSON.
    pub async fn recv_json(&mut self) -> anyhow::Result<Value> {
        let text = self.recv_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn send_frame(&mut self, frame: Frame) -> anyhow::Result<()> {
        self.send_raw(&frame.encode(None)).await
    }

    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.send_frame(Frame::text(text)).await
    }

    pub async fn send_json(&mut self, value: &Value) -> anyhow::Result<()> {
        self.send_text(&value.to_string()).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
