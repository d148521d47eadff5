//! WebSocket transport layer.
//!
//! A minimal RFC 6455 client: plain `ws://` over TCP, no extensions, text
//! messages only. Everything above the byte stream (JSON-RPC) lives in
//! [`crate::rpc`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  RpcClient      │                              │  App Server     │
//! │                 │         WebSocket            │                 │
//! │  Connection     │◄────────────────────────────►│  JSON-RPC 2.0   │
//! │  → event loop   │        ws://host:PORT        │  endpoint       │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::connect` - TCP connect, then upgrade handshake
//! 2. Event loop task starts, owning the socket
//! 3. `Connection::send` - Queue text frames; inbound text goes to the sink
//! 4. `Connection::disconnect` - Close frame, loop stops, socket released
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame encode/decode |
//! | `handshake` | HTTP upgrade request and response validation |
//! | `connection` | Connection state machine and event loop |
//! | `options` | Timeouts and size limits |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Frame codec.
pub mod frame;

/// Opening handshake.
pub mod handshake;

/// Connection options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, DisconnectReason, Endpoint, InboundSink};
pub use frame::{Frame, OpCode, ParseOutcome, encode_frame, try_parse_frame};
pub use options::ConnectOptions;
