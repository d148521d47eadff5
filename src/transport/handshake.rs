//! WebSocket opening handshake (client side).
//!
//! Sends the HTTP/1.1 upgrade request, reads the response up to the blank
//! line, and checks the `Sec-WebSocket-Accept` digest. Bytes the server sent
//! after the header block are returned to the caller: they are the start of
//! the frame stream.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// GUID appended to the key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header block terminator.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Read chunk size while waiting for the response headers.
const READ_CHUNK: usize = 4096;

// ============================================================================
// Key Material
// ============================================================================

/// Generates a base64-encoded 16-byte random nonce.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// Computes the `Sec-WebSocket-Accept` value the server must return.
#[must_use]
pub fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

// ============================================================================
// Request
// ============================================================================

/// Returns the request target: path (default `/`) plus `?query`.
#[must_use]
pub fn request_path(url: &Url) -> String {
    let path = match url.path() {
        "" => "/",
        path => path,
    };
    match url.query() {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_string(),
    }
}

/// Returns the `Host` header value, including an explicit port.
#[must_use]
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Builds the upgrade request text.
#[must_use]
pub fn build_request(url: &Url, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path = request_path(url),
        host = host_header(url),
    )
}

// ============================================================================
// Response
// ============================================================================

/// Parsed upgrade response head.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// Status line, e.g. `HTTP/1.1 101 Switching Protocols`.
    pub status_line: String,
    /// Headers keyed by lowercase name.
    pub headers: FxHashMap<String, String>,
}

impl HandshakeResponse {
    /// Parses the header block (terminator optional).
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] if the block is not UTF-8 or has
    /// no status line.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::handshake_rejected("response headers are not UTF-8"))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::handshake_rejected("empty response"))?
            .to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            status_line,
            headers,
        })
    }

    /// Returns a header value by case-insensitive name.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Checks the status code and accept digest against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] on a non-101 status or a missing
    /// or mismatched `Sec-WebSocket-Accept`.
    pub fn validate(&self, key: &str) -> Result<()> {
        let is_switching = self.status_line.split_whitespace().nth(1) == Some("101");
        if !is_switching {
            return Err(Error::handshake_rejected(format!(
                "unexpected status: {}",
                self.status_line
            )));
        }

        let expected = expected_accept(key);
        match self.header("sec-websocket-accept") {
            Some(accept) if accept == expected => Ok(()),
            Some(accept) => Err(Error::handshake_rejected(format!(
                "Sec-WebSocket-Accept mismatch: got {accept}, expected {expected}"
            ))),
            None => Err(Error::handshake_rejected("missing Sec-WebSocket-Accept")),
        }
    }
}

/// Finds the end of the header block, returning the index past the terminator.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

// ============================================================================
// Handshake
// ============================================================================

/// Performs the upgrade on `stream` with a freshly generated key.
///
/// Returns the bytes received after the header block.
///
/// # Errors
///
/// See [`perform_handshake_with_key`].
pub async fn perform_handshake<S>(stream: &mut S, url: &Url, max_header_size: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    perform_handshake_with_key(stream, url, &key, max_header_size).await
}

/// Performs the upgrade on `stream` using `key`.
///
/// # Errors
///
/// - [`Error::Io`] if writing the request fails
/// - [`Error::ConnectionClosed`] if the server closes before the headers end
/// - [`Error::HandshakeTooLarge`] if headers exceed `max_header_size`
/// - [`Error::HandshakeRejected`] if the response fails validation
pub async fn perform_handshake_with_key<S>(
    stream: &mut S,
    url: &Url,
    key: &str,
    max_header_size: usize,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_request(url, key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    trace!(path = %request_path(url), "Upgrade request sent");

    let mut received = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let header_end = loop {
        if let Some(end) = find_header_end(&received) {
            break end;
        }
        if received.len() > max_header_size {
            return Err(Error::HandshakeTooLarge {
                limit: max_header_size,
            });
        }

        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        received.extend_from_slice(&chunk[..read]);
    };

    if header_end > max_header_size {
        return Err(Error::HandshakeTooLarge {
            limit: max_header_size,
        });
    }

    let response = HandshakeResponse::parse(&received[..header_end - HEADER_TERMINATOR.len()])?;
    response.validate(key)?;

    let leftover = received.split_off(header_end);
    debug!(leftover = leftover.len(), "WebSocket handshake completed");

    Ok(leftover)
}

// ============================================================================
// Tests
// ============================================================================
