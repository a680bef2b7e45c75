//! EventSub push notifications over a websocket.

mod client;
mod types;

pub use client::{
    DEFAULT_EVENTSUB_URL, EventSubClient, EventSubConfig, EventSubHandler, EventSubState, Topic,
    TopicSource,
};
pub use types::{
    CHANNEL_BITS_USE, CHANNEL_CHEER, CHANNEL_FOLLOW, CHANNEL_POINTS_REDEMPTION_ADD,
    CHANNEL_POINTS_REDEMPTION_UPDATE, ChannelBitsUse, ChannelCheer, ChannelFollow, Condition,
    Frame, MessageType, Metadata, Notification, NotificationPayload, NotificationSubscription,
    Reward, RewardRedemption, Session, SessionPayload, SubscriptionData, SubscriptionRequest,
    SubscriptionResponse, Transport, subscription_version,
};
