//! Error types for the upstream clients.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::irc::ParseError;

/// Result type for upstream client operations.
pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("malformed line: {0}")]
    Parse(#[from] ParseError),

    /// A syntactically valid message lacked fields its command requires.
    #[error("invalid {command}: {reason}")]
    Decode {
        command: String,
        reason: &'static str,
    },

    #[error("timed out waiting for {stage}")]
    HandshakeTimeout { stage: &'static str },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limit exceeded")]
    RateExceeded,

    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("not connected")]
    NotConnected,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("subscription rejected: {0}")]
    SubscribeRejected(String),

    #[error("no response to request {nonce} within {timeout:?}")]
    CorrelationTimeout { nonce: String, timeout: Duration },

    #[error("request {nonce} abandoned by reconnect")]
    CorrelationLost { nonce: String },

    #[error("read loop did not exit within {0:?}")]
    CloseTimeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("token is missing the {0:?} scope")]
    MissingScope(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported websocket scheme {0:?}")]
    UnsupportedScheme(String),
}

impl SourceError {
    /// Failures that retrying cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::SubscribeRejected(_)
                | Self::MissingScope(_)
                | Self::Url(_)
                | Self::UnsupportedScheme(_)
        )
    }

    /// Connection-level failures a subscription client recovers from by
    /// reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::HandshakeTimeout { .. }
                | Self::CorrelationTimeout { .. }
                | Self::CorrelationLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SourceError::ConnectionClosed.is_transient());
        assert!(SourceError::HandshakeTimeout { stage: "welcome" }.is_transient());
        assert!(!SourceError::Cancelled.is_transient());
        assert!(!SourceError::SubscribeRejected("ERR_BADAUTH".into()).is_transient());
        assert!(SourceError::SubscribeRejected("ERR_BADAUTH".into()).is_permanent());
        assert!(SourceError::UnsupportedScheme("http".into()).is_permanent());
        assert!(!SourceError::CorrelationLost { nonce: "n".into() }.is_permanent());
    }

    #[test]
    fn status_error_message() {
        let err = SourceError::Status {
            method: "POST",
            url: "https://api.twitch.tv/helix/eventsub/subscriptions".into(),
            status: 409,
            body: "conflict".into(),
        };
        assert_eq!(
            err.to_string(),
            "POST https://api.twitch.tv/helix/eventsub/subscriptions returned 409: conflict"
        );
    }
}
