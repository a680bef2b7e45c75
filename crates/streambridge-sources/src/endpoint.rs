//! Websocket endpoint validation.

use url::Url;

use crate::error::{SourceError, SourceResult};

/// Parses a configured websocket endpoint.
///
/// # Errors
///
/// [`SourceError::Url`] when `raw` is not a URL and
/// [`SourceError::UnsupportedScheme`] unless it is `ws` or `wss`.
pub fn websocket_url(raw: &str) -> SourceResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(SourceError::UnsupportedScheme(other.to_string())),
    }
}
