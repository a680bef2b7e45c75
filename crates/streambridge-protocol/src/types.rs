//! Envelope types carried on the export stream.

use serde::{Deserialize, Serialize};
use streambridge_core::{BitsEvent, ChatEvent, Redemption};

use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::encode_frame;

/// A normalized event wrapped with its kind tag.
///
/// Serializes as `{"type": <kind>, "data": <payload>}`. The keepalive has no
/// data and serializes as `{"type":"ping"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Envelope {
    #[serde(rename = "chat")]
    Chat(ChatEvent),
    #[serde(rename = "redemption")]
    Redemption(Redemption),
    #[serde(rename = "bits")]
    Bits(BitsEvent),
    #[serde(rename = "streamelements-perk")]
    Perk(Redemption),
    #[serde(rename = "ping")]
    Ping,
}

impl Envelope {
    /// Every kind tag this version understands.
    pub const KINDS: [&'static str; 5] = ["chat", "redemption", "bits", "streamelements-perk", "ping"];

    /// The kind tag written in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Redemption(_) => "redemption",
            Self::Bits(_) => "bits",
            Self::Perk(_) => "streamelements-perk",
            Self::Ping => "ping",
        }
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self, Self::Ping)
    }

    /// Serializes the envelope to its JSON payload.
    pub fn to_payload(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Serializes and frames the envelope.
    pub fn to_frame(&self) -> ProtocolResult<Vec<u8>> {
        encode_frame(&self.to_payload()?)
    }
}

impl From<ChatEvent> for Envelope {
    fn from(event: ChatEvent) -> Self {
        Self::Chat(event)
    }
}

impl From<BitsEvent> for Envelope {
    fn from(event: BitsEvent) -> Self {
        Self::Bits(event)
    }
}

/// A decoded payload from the export stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Envelope(Envelope),
    /// A well-formed envelope whose kind this version does not know.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct KindProbe {
    #[serde(rename = "type")]
    kind: String,
}

/// Decodes one frame payload.
///
/// Envelopes of an unknown kind are returned as [`Inbound::Unknown`] so a
/// newer daemon does not break older consumers.
///
/// # Errors
///
/// Returns [`ProtocolError::EmptyMessage`] for an empty payload and
/// [`ProtocolError::Serialization`] for payloads that are not an envelope,
/// or whose data does not match a known kind.
pub fn decode_envelope(payload: &[u8]) -> ProtocolResult<Inbound> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }

    let probe: KindProbe = serde_json::from_slice(payload)?;
    if !Envelope::KINDS.contains(&probe.kind.as_str()) {
        return Ok(Inbound::Unknown { kind: probe.kind });
    }

    Ok(Inbound::Envelope(serde_json::from_slice(payload)?))
}
