//! EventSub websocket session.
//!
//! The client opens a socket, waits for the welcome frame, registers every
//! topic from its [`TopicSource`] against the welcomed session, and then
//! streams notifications to an [`EventSubHandler`]. A missed keepalive forces
//! a full reconnect; a `session_reconnect` frame moves the client onto the
//! advertised URL before the old socket is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{
    Condition, Frame, MessageType, Notification, NotificationPayload, NotificationSubscription,
    Session, SessionPayload, SubscriptionData, SubscriptionRequest,
};
use crate::endpoint::websocket_url;
use crate::error::{SourceError, SourceResult};
use crate::helix::HelixClient;
use crate::timer::Deadline;

pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection progress of an [`EventSubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSubState {
    Disconnected,
    SocketOpen,
    Welcomed(String),
    Subscribing,
    Streaming,
}

/// One subscription to register on every new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub subscription_type: String,
    pub condition: Condition,
}

impl Topic {
    pub fn new(subscription_type: impl Into<String>, condition: Condition) -> Self {
        Self {
            subscription_type: subscription_type.into(),
            condition,
        }
    }
}

/// Supplies the topics to subscribe after each welcome.
pub trait TopicSource: Send + Sync {
    fn topics(&self) -> Vec<Topic>;
}

impl TopicSource for Vec<Topic> {
    fn topics(&self) -> Vec<Topic> {
        self.clone()
    }
}

/// Receives decoded frames from a streaming session.
pub trait EventSubHandler: Send {
    fn on_notification(&mut self, notification: Notification);

    /// The platform revoked a subscription.
    fn on_revocation(&mut self, subscription: &NotificationSubscription) {
        warn!(
            subscription_type = %subscription.subscription_type,
            status = %subscription.status,
            "subscription revoked"
        );
    }
}

#[derive(Debug, Clone)]
pub struct EventSubConfig {
    pub url: String,
    /// Keepalive window used unless the welcome advertises a longer one.
    pub keepalive: Duration,
    /// Added to the advertised keepalive interval.
    pub keepalive_grace: Duration,
    pub welcome_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for EventSubConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EVENTSUB_URL.to_string(),
            keepalive: Duration::from_secs(60),
            keepalive_grace: Duration::from_secs(10),
            welcome_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(10),
        }
    }
}

impl EventSubConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Duration, grace: Duration) -> Self {
        self.keepalive = keepalive;
        self.keepalive_grace = grace;
        self
    }

    #[must_use]
    pub fn with_welcome_timeout(mut self, timeout: Duration) -> Self {
        self.welcome_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Keepalive window for a welcomed session.
    pub fn keepalive_for(&self, session: &Session) -> Duration {
        session
            .keepalive_timeout_seconds
            .map(|secs| Duration::from_secs(secs) + self.keepalive_grace)
            .filter(|advertised| *advertised > self.keepalive)
            .unwrap_or(self.keepalive)
    }
}

/// How a single connection ended without an error.
enum Exit {
    Cancelled,
    KeepaliveExpired,
}

pub struct EventSubClient {
    config: EventSubConfig,
    helix: HelixClient,
    topics: Arc<dyn TopicSource>,
    state: watch::Sender<EventSubState>,
    state_rx: watch::Receiver<EventSubState>,
    subscriptions: Vec<SubscriptionData>,
    retries: u64,
}

impl std::fmt::Debug for EventSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubClient")
            .field("config", &self.config)
            .field("state", &*self.state_rx.borrow())
            .field("subscriptions", &self.subscriptions.len())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl EventSubClient {
    pub fn new(config: EventSubConfig, helix: HelixClient, topics: Arc<dyn TopicSource>) -> Self {
        let (state, state_rx) = watch::channel(EventSubState::Disconnected);
        Self {
            config,
            helix,
            topics,
            state,
            state_rx,
            subscriptions: Vec::new(),
            retries: 0,
        }
    }

    pub fn state(&self) -> EventSubState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<EventSubState> {
        self.state_rx.clone()
    }

    /// Subscriptions created on the current session.
    pub fn subscriptions(&self) -> &[SubscriptionData] {
        &self.subscriptions
    }

    /// Connections retried after a read error.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    fn set_state(&self, state: EventSubState) {
        debug!(?state, "eventsub state");
        self.state.send_replace(state);
    }

    /// Runs until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SubscribeRejected`] when the platform refuses a
    /// subscription. Every other failure is retried after the configured
    /// backoff.
    pub async fn run<H: EventSubHandler>(
        &mut self,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> SourceResult<()> {
        websocket_url(&self.config.url)?;
        loop {
            let url = self.config.url.clone();
            let result = self.run_connection(&url, handler, cancel).await;
            self.subscriptions.clear();
            self.set_state(EventSubState::Disconnected);

            match result {
                Ok(Exit::Cancelled) | Err(SourceError::Cancelled) => return Ok(()),
                Ok(Exit::KeepaliveExpired) => {
                    info!("keepalive missed, reconnecting");
                }
                Err(err @ SourceError::SubscribeRejected(_)) => return Err(err),
                Err(err) => {
                    self.retries += 1;
                    warn!(
                        error = %err,
                        retries = self.retries,
                        backoff = ?self.config.retry_backoff,
                        "eventsub connection failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
            }
        }
    }

    async fn run_connection<H: EventSubHandler>(
        &mut self,
        url: &str,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> SourceResult<Exit> {
        let (mut ws, session) = self.open(url, cancel).await?;
        self.subscribe_all(&session.id).await?;
        self.set_state(EventSubState::Streaming);

        let mut keepalive = Deadline::armed(self.config.keepalive_for(&session));
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(Exit::Cancelled);
                }
                () = keepalive.expired() => {
                    warn!(window = ?keepalive.duration(), "no keepalive received");
                    return Ok(Exit::KeepaliveExpired);
                }
                message = ws.next() => message,
            };

            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "eventsub socket closed by server");
                    return Err(SourceError::ConnectionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(SourceError::ConnectionClosed),
            };

            let frame: Frame = match serde_json::from_str(text.as_str()) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "undecodable eventsub frame");
                    continue;
                }
            };

            match frame.metadata.message_type {
                MessageType::SessionKeepalive => keepalive.reset(),
                MessageType::Notification => {
                    keepalive.reset();
                    dispatch(handler, frame.payload);
                }
                MessageType::SessionReconnect => {
                    let payload: SessionPayload = serde_json::from_value(frame.payload)?;
                    let Some(reconnect_url) = payload.session.reconnect_url else {
                        warn!("session_reconnect without reconnect_url");
                        continue;
                    };
                    info!(url = %reconnect_url, "server requested reconnect");
                    let (next, session) = self.open(&reconnect_url, cancel).await?;
                    let mut old = std::mem::replace(&mut ws, next);
                    let _ = old.close(None).await;
                    drop(old);

                    self.subscriptions.clear();
                    self.subscribe_all(&session.id).await?;
                    self.set_state(EventSubState::Streaming);
                    keepalive.set_duration(self.config.keepalive_for(&session));
                    keepalive.reset();
                }
                MessageType::Revocation => match serde_json::from_value::<NotificationPayload>(frame.payload) {
                    Ok(payload) => handler.on_revocation(&payload.subscription),
                    Err(err) => warn!(error = %err, "undecodable revocation"),
                },
                MessageType::SessionWelcome => debug!("ignoring repeated welcome"),
                MessageType::Other(kind) => debug!(%kind, "ignoring eventsub frame"),
            }
        }
    }

    /// Connects to `url` and waits for its welcome.
    async fn open(&self, url: &str, cancel: &CancellationToken) -> SourceResult<(WsStream, Session)> {
        debug!(%url, "connecting to eventsub");
        let ws_url = websocket_url(url)?;
        let (mut ws, _) = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            connected = connect_async(ws_url.as_str()) => connected?,
        };
        self.set_state(EventSubState::SocketOpen);

        let welcome = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            welcome = tokio::time::timeout(self.config.welcome_timeout, next_welcome(&mut ws)) => welcome,
        };
        let session = welcome.map_err(|_| SourceError::HandshakeTimeout {
            stage: "session welcome",
        })??;

        info!(session_id = %session.id, "eventsub session welcomed");
        self.set_state(EventSubState::Welcomed(session.id.clone()));
        Ok((ws, session))
    }

    async fn subscribe_all(&mut self, session_id: &str) -> SourceResult<()> {
        self.set_state(EventSubState::Subscribing);
        for topic in self.topics.topics() {
            let request =
                SubscriptionRequest::websocket(&topic.subscription_type, topic.condition, session_id);
            let created = self
                .helix
                .create_subscription(&request)
                .await
                .map_err(|err| match err {
                    SourceError::Status { .. } => SourceError::SubscribeRejected(format!(
                        "{}: {err}",
                        topic.subscription_type
                    )),
                    other => other,
                })?;
            info!(
                subscription_type = %created.subscription_type,
                id = %created.id,
                status = %created.status,
                "subscribed"
            );
            self.subscriptions.push(created);
        }
        Ok(())
    }
}

async fn next_welcome(ws: &mut WsStream) -> SourceResult<Session> {
    while let Some(message) = ws.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        let frame: Frame = serde_json::from_str(text.as_str())?;
        if frame.metadata.message_type == MessageType::SessionWelcome {
            let payload: SessionPayload = serde_json::from_value(frame.payload)?;
            return Ok(payload.session);
        }
        debug!(message_type = ?frame.metadata.message_type, "frame before welcome");
    }
    Err(SourceError::ConnectionClosed)
}

fn dispatch<H: EventSubHandler>(handler: &mut H, payload: serde_json::Value) {
    let payload: NotificationPayload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "undecodable notification");
            return;
        }
    };
    let subscription_type = payload.subscription.subscription_type.clone();
    match Notification::from_payload(payload) {
        Ok(notification) => handler.on_notification(notification),
        Err(err) => warn!(%subscription_type, error = %err, "notification event did not match its type"),
    }
}
