//! StreamElements store redemption payloads.
//!
//! Only the `redemption` event is modeled. Perk items become
//! `streamelements-perk` envelopes; effects and codes are handled by the
//! store itself.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use streambridge_core::Redemption as RedemptionEvent;
use streambridge_protocol::Envelope;

pub const EVENT_REDEMPTION: &str = "redemption";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Perk,
    Effect,
    Code,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Redeemer {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(rename = "isPartner", default)]
    pub is_partner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Item {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default)]
    pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub redeemer_type: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
    #[serde(default)]
    pub channel: String,
    pub redeemer: Redeemer,
    pub item: Item,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Redemption {
    /// Normalizes a perk redemption for `channel`. Other item types yield `None`.
    pub fn perk_envelope(&self, channel: &str) -> Option<Envelope> {
        (self.item.kind == ItemType::Perk).then(|| {
            Envelope::Perk(RedemptionEvent::new(
                self.item.name.clone(),
                &self.redeemer.username,
                channel,
            ))
        })
    }
}
