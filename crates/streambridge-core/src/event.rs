//! Normalized event payloads.
//!
//! These are the `data` halves of the envelopes placed on the export
//! transport. Field names follow the wire contract expected by consumers,
//! which is why `bitsUsed` is camel-cased while the rest are single words.

use serde::{Deserialize, Serialize};

/// A chat command typed by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub text: String,
    pub sender: String,
    pub channel: String,
}

/// A reward redemption, from channel points or the reward service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub title: String,
    pub redeemer: String,
    pub channel: String,
}

impl Redemption {
    /// Builds a redemption, compacting the redeemer login.
    pub fn new(title: impl Into<String>, redeemer: &str, channel: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            redeemer: compact_login(redeemer),
            channel: channel.into(),
        }
    }
}

/// Bits cheered in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitsEvent {
    #[serde(rename = "bitsUsed")]
    pub bits_used: i64,
    pub user: String,
    pub channel: String,
}

/// Removes all spaces from a user name.
///
/// Downstream action strings are space-separated, so user names must be a
/// single token.
pub fn compact_login(login: &str) -> String {
    login.chars().filter(|c| *c != ' ').collect()
}

/// Truncates `text` to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
