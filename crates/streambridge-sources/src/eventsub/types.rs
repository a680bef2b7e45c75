//! EventSub wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHANNEL_POINTS_REDEMPTION_ADD: &str =
    "channel.channel_points_custom_reward_redemption.add";
pub const CHANNEL_POINTS_REDEMPTION_UPDATE: &str =
    "channel.channel_points_custom_reward_redemption.update";
pub const CHANNEL_CHEER: &str = "channel.cheer";
pub const CHANNEL_FOLLOW: &str = "channel.follow";
pub const CHANNEL_BITS_USE: &str = "channel.bits.use";

/// Version registered for a known subscription type.
pub fn subscription_version(subscription_type: &str) -> Option<&'static str> {
    match subscription_type {
        CHANNEL_POINTS_REDEMPTION_ADD
        | CHANNEL_POINTS_REDEMPTION_UPDATE
        | CHANNEL_CHEER
        | CHANNEL_FOLLOW
        | CHANNEL_BITS_USE => Some("1"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub broadcaster_user_id: String,
}

impl Condition {
    pub fn broadcaster(user_id: impl Into<String>) -> Self {
        Self {
            broadcaster_user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Transport {
    pub fn websocket(session_id: impl Into<String>) -> Self {
        Self {
            method: "websocket".to_string(),
            session_id: Some(session_id.into()),
        }
    }
}

/// Body of a subscription create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: Condition,
    pub transport: Transport,
}

impl SubscriptionRequest {
    pub fn websocket(
        subscription_type: impl Into<String>,
        condition: Condition,
        session_id: impl Into<String>,
    ) -> Self {
        let subscription_type = subscription_type.into();
        Self {
            version: subscription_version(&subscription_type)
                .unwrap_or("1")
                .to_string(),
            subscription_type,
            condition,
            transport: Transport::websocket(session_id),
        }
    }
}

/// A subscription as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionData {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionResponse {
    pub data: Vec<SubscriptionData>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub total_cost: i64,
    #[serde(default)]
    pub max_total_cost: i64,
}

/// Kind of a websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    SessionWelcome,
    SessionKeepalive,
    SessionReconnect,
    Notification,
    Revocation,
    Other(String),
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            "session_welcome" => Self::SessionWelcome,
            "session_keepalive" => Self::SessionKeepalive,
            "session_reconnect" => Self::SessionReconnect,
            "notification" => Self::Notification,
            "revocation" => Self::Revocation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub message_id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub message_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription_type: Option<String>,
}

/// One frame from the EventSub socket.
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    pub metadata: Metadata,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

/// Payload of `session_welcome` and `session_reconnect`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPayload {
    pub session: Session,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSubscription {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
}

/// Payload of a `notification` frame before the event is typed.
///
/// `revocation` frames share the shape with an empty event.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub subscription: NotificationSubscription,
    #[serde(default)]
    pub event: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Reward {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub prompt: String,
}

/// `channel.channel_points_custom_reward_redemption.add` and `.update`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardRedemption {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub status: String,
    pub reward: Reward,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// `channel.cheer`. User fields are null for anonymous cheers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelCheer {
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    #[serde(default)]
    pub message: String,
    pub bits: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelFollow {
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    #[serde(default)]
    pub followed_at: Option<DateTime<Utc>>,
}

/// `channel.bits.use`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelBitsUse {
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    pub bits: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A typed notification event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    RewardRedemptionAdd(RewardRedemption),
    RewardRedemptionUpdate(RewardRedemption),
    ChannelCheer(ChannelCheer),
    ChannelFollow(ChannelFollow),
    ChannelBitsUse(ChannelBitsUse),
    /// A subscription type without a dedicated variant.
    Other {
        subscription_type: String,
        event: serde_json::Value,
    },
}

impl Notification {
    /// Types the event of a notification payload by its subscription type.
    pub fn from_payload(payload: NotificationPayload) -> serde_json::Result<Self> {
        let NotificationPayload {
            subscription,
            event,
        } = payload;
        Ok(match subscription.subscription_type.as_str() {
            CHANNEL_POINTS_REDEMPTION_ADD => {
                Self::RewardRedemptionAdd(serde_json::from_value(event)?)
            }
            CHANNEL_POINTS_REDEMPTION_UPDATE => {
                Self::RewardRedemptionUpdate(serde_json::from_value(event)?)
            }
            CHANNEL_CHEER => Self::ChannelCheer(serde_json::from_value(event)?),
            CHANNEL_FOLLOW => Self::ChannelFollow(serde_json::from_value(event)?),
            CHANNEL_BITS_USE => Self::ChannelBitsUse(serde_json::from_value(event)?),
            _ => Self::Other {
                subscription_type: subscription.subscription_type,
                event,
            },
        })
    }

    pub fn subscription_type(&self) -> &str {
        match self {
            Self::RewardRedemptionAdd(_) => CHANNEL_POINTS_REDEMPTION_ADD,
            Self::RewardRedemptionUpdate(_) => CHANNEL_POINTS_REDEMPTION_UPDATE,
            Self::ChannelCheer(_) => CHANNEL_CHEER,
            Self::ChannelFollow(_) => CHANNEL_FOLLOW,
            Self::ChannelBitsUse(_) => CHANNEL_BITS_USE,
            Self::Other {
                subscription_type, ..
            } => subscription_type,
        }
    }
}
