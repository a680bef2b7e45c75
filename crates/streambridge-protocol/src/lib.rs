//! Local export protocol for streambridge.
//!
//! The connector daemon pushes normalized events to consumer processes over
//! a local byte stream. Each message is a length-prefixed JSON envelope:
//!
//! ```text
//! +--------------------+------------------------------+
//! | length (u16, LE)   |  {"type": ..., "data": ...}  |
//! +--------------------+------------------------------+
//! ```
//!
//! Payloads are capped at 65,535 bytes by the width of the prefix. When the
//! stream has been idle the daemon sends [`KEEPALIVE_PAYLOAD`].
//!
//! # Example
//!
//! ```rust
//! use streambridge_core::ChatEvent;
//! use streambridge_protocol::{Envelope, Inbound, decode_envelope, decode_frame};
//!
//! let envelope = Envelope::Chat(ChatEvent {
//!     text: "#help".into(),
//!     sender: "demo".into(),
//!     channel: "demo".into(),
//! });
//! let frame = envelope.to_frame().unwrap();
//! let payload = decode_frame(&frame).unwrap();
//! assert_eq!(decode_envelope(payload).unwrap(), Inbound::Envelope(envelope));
//! ```

mod error;
mod framing;
mod socket;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{
    DEFAULT_READ_BUFFER, FrameReader, FrameWriter, decode_frame, encode_frame, encode_message,
};
pub use socket::default_socket_path;
pub use types::{Envelope, Inbound, decode_envelope};

/// Largest payload a frame can carry.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 2;

/// Payload sent by the exporter when a connection has been idle.
pub const KEEPALIVE_PAYLOAD: &[u8] = br#"{"type":"ping"}"#;
