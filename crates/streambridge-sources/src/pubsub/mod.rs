//! PubSub topic listener.

mod client;
mod types;

pub use client::{
    CHANNEL_POINTS_SCOPE, DEFAULT_PUBSUB_URL, PubSubClient, PubSubConfig, PubSubHandler,
    channel_points_topic,
};
pub use types::{
    BITS_EVENT, BitsEvent, Event, EventType, ListenData, MessageData, PubSubMessage,
    REWARD_REDEEMED, Redemption, Request, Reward, RewardRedeemed, User,
};
