//! WebSocket frame codec (RFC 6455 subset).
//!
//! Pure functions over byte buffers: no I/O, no state beyond the buffer the
//! caller passes in. Parsing is restartable, so the caller keeps unconsumed
//! bytes and retries once more data arrives.
//!
//! # Wire Layout
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |          (16/64 bits)         |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |  Masking key (0 or 4 bytes)   |          Payload data         |
//! +-------------------------------+-------------------------------+
//! ```

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// FIN bit in the first header byte.
const FIN_BIT: u8 = 0x80;

/// Reserved bits (RSV1-3); extensions are never negotiated.
const RSV_BITS: u8 = 0x70;

/// MASK bit in the second header byte.
const MASK_BIT: u8 = 0x80;

/// Largest payload encodable in the 7-bit length field.
const MAX_SHORT_LEN: usize = 125;

/// Length marker for a 16-bit extended length.
const LEN_16_MARKER: u8 = 126;

/// Length marker for a 64-bit extended length.
const LEN_64_MARKER: u8 = 127;

/// Control frames carry at most 125 bytes.
pub const MAX_CONTROL_PAYLOAD: usize = MAX_SHORT_LEN;

// ============================================================================
// OpCode
// ============================================================================

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl OpCode {
    /// Decodes the low nibble of the first header byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Frame`] for reserved opcodes.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::frame(format!("reserved opcode 0x{other:X}"))),
        }
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a final (unfragmented) frame.
    #[inline]
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Creates a text frame.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, text.into().into_bytes())
    }

    /// Creates a close frame with an empty body.
    #[inline]
    #[must_use]
    pub fn close() -> Self {
        Self::new(OpCode::Close, Vec::new())
    }

    /// Marks this frame as a non-final fragment.
    #[inline]
    #[must_use]
    pub fn fragment(mut self) -> Self {
        self.fin = false;
        self
    }

    /// Serializes the frame.
    ///
    /// Client frames must pass `Some(mask)`; servers send `None`.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        let first = if self.fin { FIN_BIT } else { 0 } | self.opcode.as_u8();
        out.push(first);

        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
        if len <= MAX_SHORT_LEN {
            out.push(mask_bit | len as u8);
        } else if len <= usize::from(u16::MAX) {
            out.push(mask_bit | LEN_16_MARKER);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | LEN_64_MARKER);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                out.extend(
                    self.payload
                        .iter()
                        .enumerate()
                        .map(|(i, byte)| byte ^ key[i % 4]),
                );
            }
            None => out.extend_from_slice(&self.payload),
        }

        out
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a final client frame with a fresh random mask.
#[must_use]
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    Frame::new(opcode, payload).encode(Some(random_mask()))
}

/// Generates a masking key from the thread-local CSPRNG.
#[inline]
#[must_use]
pub fn random_mask() -> [u8; 4] {
    rand::random()
}

/// XORs `data` in place with `mask`, starting at mask offset 0.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Result of a parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A whole frame was decoded.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
    /// The buffer holds only part of a frame.
    NeedMoreData,
}

/// Attempts to decode one frame from the front of `buf`.
///
/// # Errors
///
/// - [`Error::Frame`] for reserved bits or opcodes, or a fragmented or
///   oversized control frame
/// - [`Error::FrameTooLarge`] if the declared length does not fit in `usize`
pub fn try_parse_frame(buf: &[u8]) -> Result<ParseOutcome> {
    try_parse_frame_limited(buf, usize::MAX)
}

/// Like [`try_parse_frame`], rejecting payloads above `max_payload` as soon
/// as the length field is readable.
///
/// # Errors
///
/// Same as [`try_parse_frame`], plus [`Error::FrameTooLarge`] when the
/// declared length exceeds `max_payload`.
pub fn try_parse_frame_limited(buf: &[u8], max_payload: usize) -> Result<ParseOutcome> {
    let [b0, b1, ..] = *buf else {
        return Ok(ParseOutcome::NeedMoreData);
    };

    if b0 & RSV_BITS != 0 {
        return Err(Error::frame("reserved bits set without a negotiated extension"));
    }

    let fin = b0 & FIN_BIT != 0;
    let opcode = OpCode::from_u8(b0 & 0x0F)?;
    let masked = b1 & MASK_BIT != 0;

    let mut index = 2;
    let declared: u64 = match b1 & 0x7F {
        LEN_16_MARKER => {
            let Some(bytes) = buf.get(index..index + 2) else {
                return Ok(ParseOutcome::NeedMoreData);
            };
            index += 2;
            u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))
        }
        LEN_64_MARKER => {
            let Some(bytes) = buf.get(index..index + 8) else {
                return Ok(ParseOutcome::NeedMoreData);
            };
            index += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            u64::from_be_bytes(raw)
        }
        short => u64::from(short),
    };

    let payload_len = usize::try_from(declared)
        .map_err(|_| Error::frame_too_large(declared, usize::MAX as u64))?;
    if payload_len > max_payload {
        return Err(Error::frame_too_large(declared, max_payload as u64));
    }

    if opcode.is_control() {
        if !fin {
            return Err(Error::frame("fragmented control frame"));
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(Error::frame(format!(
                "control frame payload of {payload_len} bytes"
            )));
        }
    }

    let mask = if masked {
        let Some(bytes) = buf.get(index..index + 4) else {
            return Ok(ParseOutcome::NeedMoreData);
        };
        index += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let Some(end) = index.checked_add(payload_len) else {
        return Err(Error::frame_too_large(declared, usize::MAX as u64));
    };
    let Some(body) = buf.get(index..end) else {
        return Ok(ParseOutcome::NeedMoreData);
    };

    let mut payload = body.to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(ParseOutcome::Frame {
        frame: Frame {
            fin,
            opcode,
            payload,
        },
        consumed: end,
    })
}

// ============================================================================
// Tests
// ============================================================================
