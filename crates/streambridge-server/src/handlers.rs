//! Upstream services and the normalizers between them and the broker.
//!
//! Each `run_*` function is one named service. It owns its client, turns
//! whatever the platform delivers into an [`Envelope`], and publishes it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use streambridge_core::{BitsEvent, Broker, ChatEvent, Redemption, compact_login, truncate_chars};
use streambridge_protocol::Envelope;
use streambridge_sources::eventsub::{
    CHANNEL_CHEER, CHANNEL_POINTS_REDEMPTION_ADD, Condition, EventSubClient, EventSubConfig,
    EventSubHandler, Notification, Topic,
};
use streambridge_sources::irc::{ChatConfig, ChatMessage, ChatSession, ChatState};
use streambridge_sources::pubsub::{PubSubClient, PubSubConfig, PubSubHandler, PubSubMessage};
use streambridge_sources::{HelixClient, SourceError, TokenInfo};

use crate::config::TwitchConfig;
use crate::error::{ServerError, ServerResult};

/// Longest chat command forwarded, in characters.
pub const MAX_CHAT_TEXT: usize = 40;

/// Channel name used for redemptions that carry none.
pub const UNKNOWN_CHANNEL: &str = "-";

pub const ANONYMOUS_USER: &str = "anonymous";

pub const CHAT_SCOPE: &str = "chat:read";
pub const REDEMPTIONS_SCOPE: &str = "channel:read:redemptions";
pub const BITS_SCOPE: &str = "bits:read";

const CHAT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Turns a chat command into a `chat` envelope.
///
/// Only `PRIVMSG` lines whose text starts with `prefix` qualify.
pub fn chat_envelope(message: &ChatMessage, prefix: &str) -> Option<Envelope> {
    if !message.is_privmsg() || !message.trailer.starts_with(prefix) {
        return None;
    }
    Some(Envelope::Chat(ChatEvent {
        text: truncate_chars(&message.trailer, MAX_CHAT_TEXT).to_string(),
        sender: message.sender.clone(),
        channel: message.channel.clone(),
    }))
}

pub fn eventsub_envelope(notification: &Notification) -> Option<Envelope> {
    match notification {
        Notification::RewardRedemptionAdd(redemption) => Some(Envelope::Redemption(Redemption::new(
            redemption.reward.title.clone(),
            &redemption.user_login,
            UNKNOWN_CHANNEL,
        ))),
        Notification::ChannelCheer(cheer) => {
            let user = match (&cheer.user_name, cheer.is_anonymous) {
                (Some(name), false) => compact_login(name),
                _ => ANONYMOUS_USER.to_string(),
            };
            Some(Envelope::Bits(BitsEvent {
                bits_used: cheer.bits,
                user,
                channel: cheer.broadcaster_user_login.clone(),
            }))
        }
        _ => None,
    }
}

pub fn pubsub_envelope(message: &PubSubMessage) -> Option<Envelope> {
    match message {
        PubSubMessage::RewardRedeemed(redeemed) => {
            let redemption = &redeemed.redemption;
            Some(Envelope::Redemption(Redemption::new(
                redemption.reward.title.clone(),
                &redemption.user.login,
                UNKNOWN_CHANNEL,
            )))
        }
        PubSubMessage::BitsEvent(bits) => {
            let user = match (&bits.user_name, bits.is_anonymous) {
                (Some(name), false) => compact_login(name),
                _ => ANONYMOUS_USER.to_string(),
            };
            Some(Envelope::Bits(BitsEvent {
                bits_used: bits.bits_used,
                user,
                channel: bits.channel_name.clone(),
            }))
        }
        PubSubMessage::Other { .. } => None,
    }
}

/// Encodes envelopes once and hands them to the broker.
#[derive(Debug, Clone)]
pub struct Publisher {
    broker: Broker<Bytes>,
    topic: String,
}

impl Publisher {
    pub fn new(broker: Broker<Bytes>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Returns how many consumers accepted the envelope.
    pub fn publish(&self, envelope: &Envelope) -> usize {
        let payload = match envelope.to_payload() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(kind = envelope.kind(), error = %e, "could not encode envelope");
                return 0;
            }
        };
        let delivered = self.broker.publish(&self.topic, payload);
        debug!(kind = envelope.kind(), topic = %self.topic, delivered, "published");
        delivered
    }
}

/// Forwards EventSub notifications to a [`Publisher`].
#[derive(Debug, Clone)]
pub struct EventSubPublisher(pub Publisher);

impl EventSubHandler for EventSubPublisher {
    fn on_notification(&mut self, notification: Notification) {
        match eventsub_envelope(&notification) {
            Some(envelope) => {
                self.0.publish(&envelope);
            }
            None => debug!(
                subscription_type = notification.subscription_type(),
                "notification not exported"
            ),
        }
    }
}

/// Forwards PubSub topic messages to a [`Publisher`].
#[derive(Debug, Clone)]
pub struct PubSubPublisher(pub Publisher);

impl PubSubHandler for PubSubPublisher {
    fn on_message(&mut self, topic: &str, message: PubSubMessage) {
        match pubsub_envelope(&message) {
            Some(envelope) => {
                self.0.publish(&envelope);
            }
            None => debug!(topic, kind = message.kind(), "pubsub message not exported"),
        }
    }
}

fn helix_client(config: &TwitchConfig) -> ServerResult<HelixClient> {
    Ok(HelixClient::new(&config.oauth_token)?
        .with_helix_url(&config.helix_url)
        .with_oauth_url(&config.oauth_url))
}

async fn validate(helix: &mut HelixClient, cancel: &CancellationToken) -> ServerResult<TokenInfo> {
    tokio::select! {
        () = cancel.cancelled() => Err(SourceError::Cancelled.into()),
        info = helix.validate() => Ok(info?),
    }
}

/// EventSub topics the token's scopes allow, given what is enabled.
pub fn eventsub_topics(config: &TwitchConfig, info: &TokenInfo) -> Vec<Topic> {
    let mut topics = Vec::new();
    if config.channel_points {
        if info.has_scope(REDEMPTIONS_SCOPE) {
            topics.push(Topic::new(
                CHANNEL_POINTS_REDEMPTION_ADD,
                Condition::broadcaster(&info.user_id),
            ));
        } else {
            warn!(scope = REDEMPTIONS_SCOPE, "token cannot read channel point redemptions");
        }
    }
    if config.bits {
        if info.has_scope(BITS_SCOPE) {
            topics.push(Topic::new(CHANNEL_CHEER, Condition::broadcaster(&info.user_id)));
        } else {
            warn!(scope = BITS_SCOPE, "token cannot read bits");
        }
    }
    topics
}

/// Chat service: joins the channel and exports prefixed commands.
///
/// Connection failures are retried until `cancel` fires.
pub async fn run_chat(
    config: TwitchConfig,
    publisher: Publisher,
    cancel: CancellationToken,
) -> ServerResult<()> {
    if !config.chat {
        info!("chat disabled");
        return Ok(());
    }
    if !config.has_credentials() {
        warn!("chat enabled without a usable oauth token");
        return Ok(());
    }

    let mut helix = helix_client(&config)?;
    let info = match validate(&mut helix, &cancel).await {
        Err(ServerError::Source(SourceError::Cancelled)) => return Ok(()),
        result => result?,
    };
    info.require_scope(CHAT_SCOPE)?;

    let channel = if config.channel.is_empty() {
        info.login.clone()
    } else {
        config.channel.clone()
    };
    let chat_config = ChatConfig::new(&info.login, &config.oauth_token).with_url(&config.chat_url);
    let mut session = ChatSession::new(chat_config);

    loop {
        // Subscribed before JOIN so nothing sent right after the echo is missed.
        let joined = match session.connect(&cancel).await {
            Ok(()) => {
                let subscription = session.subscribe();
                session.join(&channel, &cancel).await.map(|()| subscription)
            }
            Err(e) => Err(e),
        };
        let mut messages = match joined {
            Ok(subscription) => subscription,
            Err(SourceError::Cancelled) => return Ok(()),
            Err(e) if e.is_permanent() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, backoff = ?CHAT_RETRY_BACKOFF, "chat connection failed, retrying");
                if !retry_after(CHAT_RETRY_BACKOFF, &cancel).await {
                    return Ok(());
                }
                continue;
            }
        };

        let mut state = session.watch_state();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = session.close().await {
                        debug!(error = %e, "chat close");
                    }
                    return Ok(());
                }
                message = messages.recv() => match message {
                    Some(message) => {
                        if let Some(envelope) = chat_envelope(&message, &config.command_prefix) {
                            publisher.publish(&envelope);
                        }
                    }
                    None => break,
                },
                () = disconnected(&mut state) => break,
            }
        }
        warn!(channel = %channel, "chat connection lost, reconnecting");
    }
}

async fn disconnected(state: &mut watch::Receiver<ChatState>) {
    let _ = state.wait_for(|s| *s == ChatState::Disconnected).await;
}

/// Sleeps for `backoff`. Returns `false` if cancelled first.
async fn retry_after(backoff: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(backoff) => true,
    }
}

/// EventSub service for channel points and bits.
pub async fn run_eventsub(
    config: TwitchConfig,
    eventsub: EventSubConfig,
    publisher: Publisher,
    cancel: CancellationToken,
) -> ServerResult<()> {
    if !config.channel_points && !config.bits {
        info!("eventsub disabled");
        return Ok(());
    }
    if !config.has_credentials() {
        warn!("eventsub enabled without a usable oauth token");
        return Ok(());
    }

    let mut helix = helix_client(&config)?;
    let info = match validate(&mut helix, &cancel).await {
        Err(ServerError::Source(SourceError::Cancelled)) => return Ok(()),
        result => result?,
    };
    let topics = eventsub_topics(&config, &info);
    if topics.is_empty() {
        warn!(login = %info.login, "no eventsub topics permitted by token");
        return Ok(());
    }

    let mut client = EventSubClient::new(eventsub, helix, Arc::new(topics));
    let mut handler = EventSubPublisher(publisher);
    client.run(&mut handler, &cancel).await?;
    Ok(())
}

/// PubSub service for channel point redemptions.
///
/// Connecting and listening are retried after the configured backoff. A
/// rejected LISTEN or a token without the redemptions scope ends the service.
pub async fn run_pubsub(
    config: TwitchConfig,
    pubsub: PubSubConfig,
    publisher: Publisher,
    cancel: CancellationToken,
) -> ServerResult<()> {
    if !config.channel_points {
        info!("pubsub disabled");
        return Ok(());
    }
    if !config.has_credentials() {
        warn!("pubsub enabled without a usable oauth token");
        return Ok(());
    }

    let helix = helix_client(&config)?;
    let backoff = pubsub.retry_backoff;
    loop {
        let handler = PubSubPublisher(publisher.clone());
        let error = match PubSubClient::connect(pubsub.clone(), handler, &cancel).await {
            Ok(mut client) => match client.subscribe_channel_points(&helix).await {
                Ok(_) => {
                    tokio::select! {
                        () = cancel.cancelled() => client.close().await,
                        () = client.closed() => {}
                    }
                    return Ok(());
                }
                Err(e) => {
                    client.close().await;
                    e
                }
            },
            Err(e) => e,
        };

        match error {
            SourceError::Cancelled => return Ok(()),
            e if e.is_permanent() => return Err(e.into()),
            e => {
                warn!(error = %e, ?backoff, "pubsub setup failed, retrying");
                if !retry_after(backoff, &cancel).await {
                    return Ok(());
                }
            }
        }
    }
}
