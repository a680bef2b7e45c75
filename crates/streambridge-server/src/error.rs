//! Server error types.

use std::io;

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] streambridge_protocol::ProtocolError),

    #[error(transparent)]
    Source(#[from] streambridge_sources::SourceError),

    #[error("socket path already in use: {path}")]
    SocketInUse { path: String },

    #[error("socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("tracing setup failed: {0}")]
    Tracing(#[from] streambridge_core::TracingError),

    #[error("server shutdown requested")]
    Shutdown,
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }
}
