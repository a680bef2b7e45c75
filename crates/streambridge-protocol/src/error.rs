//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload does not fit in a frame.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A received frame declares more bytes than the reader can hold.
    ///
    /// The stream can no longer be trusted and must be closed.
    #[error("frame of {size} bytes exceeds read buffer of {capacity} bytes")]
    FrameTooLarge { size: usize, capacity: usize },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer ended before the declared frame length.
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    #[error("empty message")]
    EmptyMessage,

    #[error("timeout during {operation}")]
    Timeout { operation: String },
}

impl ProtocolError {
    /// Returns true if the stream must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::Io(_) | Self::IncompleteMessage { .. }
        )
    }
}
