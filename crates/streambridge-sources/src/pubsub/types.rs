//! PubSub wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REWARD_REDEEMED: &str = "reward-redeemed";
pub const BITS_EVENT: &str = "bits_event";

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Request {
    Listen { nonce: String, data: ListenData },
    Ping,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ListenData {
    pub topics: Vec<String>,
    pub auth_token: String,
}

impl std::fmt::Debug for ListenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenData")
            .field("topics", &self.topics)
            .field("auth_token", &"***")
            .finish()
    }
}

/// Kind of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Response,
    Pong,
    Reconnect,
    Message,
    Other(String),
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "RESPONSE" => Self::Response,
            "PONG" => Self::Pong,
            "RECONNECT" => Self::Reconnect,
            "MESSAGE" => Self::Message,
            other => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// An inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `data` of a `MESSAGE` frame. `message` is itself JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageData {
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageBody {
    #[serde(rename = "type", alias = "message_type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Reward {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub is_user_input_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Redemption {
    pub id: String,
    pub user: User,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
    pub reward: Reward,
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardRedeemed {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub redemption: Redemption,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BitsEvent {
    #[serde(default)]
    pub user_name: Option<String>,
    pub channel_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chat_message: String,
    pub bits_used: i64,
    #[serde(default)]
    pub total_bits_used: i64,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub context: String,
}

/// A typed topic message.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubMessage {
    RewardRedeemed(RewardRedeemed),
    BitsEvent(BitsEvent),
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

impl PubSubMessage {
    /// Decodes the JSON string carried in a `MESSAGE` frame.
    pub fn decode(data: &MessageData) -> serde_json::Result<Self> {
        let body: MessageBody = serde_json::from_str(&data.message)?;
        Ok(match body.kind.as_str() {
            REWARD_REDEEMED => Self::RewardRedeemed(serde_json::from_value(body.data)?),
            BITS_EVENT => Self::BitsEvent(serde_json::from_value(body.data)?),
            _ => Self::Other {
                kind: body.kind,
                data: body.data,
            },
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::RewardRedeemed(_) => REWARD_REDEEMED,
            Self::BitsEvent(_) => BITS_EVENT,
            Self::Other { kind, .. } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listen_and_ping_wire_shape() {
        let listen = Request::Listen {
            nonce: "n-1".into(),
            data: ListenData {
                topics: vec!["channel-points-channel-v1.42".into()],
                auth_token: "tok".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&listen).unwrap(),
            json!({
                "type": "LISTEN",
                "nonce": "n-1",
                "data": {"topics": ["channel-points-channel-v1.42"], "auth_token": "tok"}
            })
        );
        assert_eq!(serde_json::to_string(&Request::Ping).unwrap(), r#"{"type":"PING"}"#);
    }

    #[test]
    fn listen_debug_hides_token() {
        let data = ListenData {
            topics: vec![],
            auth_token: "secret".into(),
        };
        assert!(!format!("{data:?}").contains("secret"));
    }

    #[test]
    fn response_without_data() {
        let event: Event = serde_json::from_str(r#"{"type":"RESPONSE","nonce":"abc","error":""}"#).unwrap();
        assert_eq!(event.kind, EventType::Response);
        assert_eq!(event.nonce, "abc");
        assert!(event.error.is_empty());
        assert!(event.data.is_null());
    }

    #[test]
    fn reward_redeemed_message_decodes() {
        let message = json!({
            "type": "reward-redeemed",
            "data": {
                "timestamp": "2019-11-12T01:29:34.98329743Z",
                "redemption": {
                    "id": "9203c6f0-51b6-4d1d-a9ae-8eafdb0d6d47",
                    "user": {"id": "30515034", "login": "davethecust", "display_name": "davethecust"},
                    "channel_id": "30515034",
                    "redeemed_at": "2019-12-11T18:52:53.128421623Z",
                    "reward": {
                        "id": "6ef17bb2-e5ae-432e-8b3f-5ac4dd774668",
                        "channel_id": "30515034",
                        "title": "hit a gleesh walk on stream",
                        "prompt": "cleanside's finest \n",
                        "cost": 10,
                        "is_user_input_required": true
                    },
                    "user_input": "yeooo",
                    "status": "FULFILLED"
                }
            }
        });
        let data = MessageData {
            topic: "channel-points-channel-v1.30515034".into(),
            message: message.to_string(),
        };
        let PubSubMessage::RewardRedeemed(redeemed) = PubSubMessage::decode(&data).unwrap() else {
            panic!("expected reward-redeemed");
        };
        assert_eq!(redeemed.redemption.user.login, "davethecust");
        assert_eq!(redeemed.redemption.reward.title, "hit a gleesh walk on stream");
        assert_eq!(redeemed.redemption.reward.cost, 10);
    }

    #[test]
    fn unknown_message_kind_is_kept() {
        let data = MessageData {
            topic: "t".into(),
            message: r#"{"type":"custom-reward-updated","data":{"x":1}}"#.into(),
        };
        let message = PubSubMessage::decode(&data).unwrap();
        assert_eq!(message.kind(), "custom-reward-updated");
        assert!(matches!(message, PubSubMessage::Other { ref data, .. } if data["x"] == 1));
    }

    #[test]
    fn message_string_must_be_json() {
        let data = MessageData {
            topic: "t".into(),
            message: "not json".into(),
        };
        assert!(PubSubMessage::decode(&data).is_err());
    }
}
