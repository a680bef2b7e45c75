//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] streambridge_protocol::ProtocolError),

    /// The daemon socket could not be reached.
    #[error("failed to connect to {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tracing setup failed: {0}")]
    Tracing(#[from] streambridge_core::TracingError),
}
