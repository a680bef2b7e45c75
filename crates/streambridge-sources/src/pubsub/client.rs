//! PubSub websocket client with request correlation.
//!
//! A single event task owns the socket, the table of outstanding requests and
//! the tracked listens. [`PubSubClient`] is the handle: it forwards LISTEN
//! requests to the task and awaits their correlated response.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::types::{Event, EventType, ListenData, MessageData, PubSubMessage, Request};
use crate::endpoint::websocket_url;
use crate::error::{SourceError, SourceResult};
use crate::helix::{HelixClient, TokenInfo};
use crate::timer::Deadline;

pub const DEFAULT_PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";
pub const CHANNEL_POINTS_SCOPE: &str = "channel:read:redemptions";

const COMMAND_QUEUE_CAPACITY: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Topic carrying channel point redemptions for `user_id`.
pub fn channel_points_topic(user_id: &str) -> String {
    format!("channel-points-channel-v1.{user_id}")
}

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub url: String,
    pub ping_interval: Duration,
    /// How long to wait for `PONG` before reconnecting.
    pub pong_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PUBSUB_URL.to_string(),
            ping_interval: Duration::from_secs(5 * 60),
            pong_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(10),
        }
    }
}

impl PubSubConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_ping(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Receives messages on tracked topics.
pub trait PubSubHandler: Send + 'static {
    fn on_message(&mut self, topic: &str, message: PubSubMessage);
}

enum Command {
    Listen {
        nonce: String,
        data: ListenData,
        waiter: oneshot::Sender<Event>,
    },
}

struct Pending {
    data: ListenData,
    waiter: oneshot::Sender<Event>,
}

/// Handle to a running PubSub connection.
pub struct PubSubClient {
    commands: mpsc::Sender<Command>,
    request_timeout: Duration,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient")
            .field("request_timeout", &self.request_timeout)
            .field("reconnects", &self.reconnects())
            .finish_non_exhaustive()
    }
}

impl PubSubClient {
    /// Opens the socket and starts the event task.
    ///
    /// # Errors
    ///
    /// Fails if the first connection cannot be established.
    pub async fn connect<H: PubSubHandler>(
        config: PubSubConfig,
        handler: H,
        cancel: &CancellationToken,
    ) -> SourceResult<Self> {
        let cancel = cancel.child_token();
        let url = websocket_url(&config.url)?;
        let ws = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            connected = connect_async(url.as_str()) => connected?.0,
        };
        info!(url = %config.url, "pubsub connected");

        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let reconnects = Arc::new(AtomicU64::new(0));
        let request_timeout = config.request_timeout;
        let event_loop = EventLoop {
            pong: Deadline::new(config.pong_timeout),
            config,
            ws,
            commands: commands_rx,
            handler,
            pending: HashMap::new(),
            tracked: HashMap::new(),
            held: Vec::new(),
            reconnects: Arc::clone(&reconnects),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(event_loop.run());

        Ok(Self {
            commands,
            request_timeout,
            reconnects,
            cancel,
            task: Some(task),
        })
    }

    /// Reconnects performed so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Listens on `topics` with `token` and waits for the server's answer.
    ///
    /// # Errors
    ///
    /// - [`SourceError::SubscribeRejected`] when the response carries an error
    /// - [`SourceError::CorrelationTimeout`] when no response arrives in time
    /// - [`SourceError::CorrelationLost`] when a reconnect discards the request
    ///
    /// After either of the last two the topics are still listened once the
    /// connection is replaced.
    pub async fn listen(&self, token: &str, topics: Vec<String>) -> SourceResult<()> {
        let nonce = Uuid::new_v4().to_string();
        let (waiter, response) = oneshot::channel();
        let data = ListenData {
            topics,
            auth_token: token.trim_start_matches("oauth:").to_string(),
        };
        self.commands
            .send(Command::Listen {
                nonce: nonce.clone(),
                data,
                waiter,
            })
            .await
            .map_err(|_| SourceError::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Err(_) => Err(SourceError::CorrelationTimeout {
                nonce,
                timeout: self.request_timeout,
            }),
            Ok(Err(_)) => Err(SourceError::CorrelationLost { nonce }),
            Ok(Ok(event)) if !event.error.is_empty() => Err(SourceError::SubscribeRejected(event.error)),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Validates the token behind `helix` and listens for its channel point
    /// redemptions.
    pub async fn subscribe_channel_points(&self, helix: &HelixClient) -> SourceResult<TokenInfo> {
        let info = helix.validate_token().await?;
        info.require_scope(CHANNEL_POINTS_SCOPE)?;
        self.listen(helix.token(), vec![channel_points_topic(&info.user_id)])
            .await?;
        info!(login = %info.login, "listening for channel point redemptions");
        Ok(info)
    }

    /// Resolves once the event task has exited.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        self.closed().await;
    }
}

impl Drop for PubSubClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Step {
    Continue,
    /// Reconnect right away.
    Reconnect,
    /// Reconnect after the retry backoff.
    Backoff,
    Stop,
}

struct EventLoop<H> {
    config: PubSubConfig,
    ws: WsStream,
    commands: mpsc::Receiver<Command>,
    handler: H,
    pending: HashMap<String, Pending>,
    /// Auth token to the topics acknowledged for it.
    tracked: HashMap<String, BTreeSet<String>>,
    /// Messages read while re-listens were outstanding.
    held: Vec<Event>,
    pong: Deadline,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<H: PubSubHandler> EventLoop<H> {
    async fn run(mut self) {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'events: loop {
            let mut step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Stop,
                () = self.pong.expired() => {
                    warn!(timeout = ?self.pong.duration(), "no PONG received");
                    Step::Reconnect
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Step::Stop,
                },
                _ = ping.tick() => self.ping().await,
                message = self.ws.next() => self.handle_message(message),
            };

            // Replayed messages may ask for another reconnect.
            loop {
                step = match step {
                    Step::Continue => continue 'events,
                    Step::Stop => break 'events,
                    Step::Backoff => {
                        tokio::select! {
                            () = self.cancel.cancelled() => break 'events,
                            () = tokio::time::sleep(self.config.retry_backoff) => {}
                        }
                        self.reconnect().await
                    }
                    Step::Reconnect => self.reconnect().await,
                };
            }
        }

        let _ = self.ws.close(None).await;
        debug!("pubsub event loop stopped");
    }

    async fn write(&mut self, request: &Request) -> SourceResult<()> {
        let text = serde_json::to_string(request)?;
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Step {
        trace!("sending PING");
        if let Err(err) = self.write(&Request::Ping).await {
            warn!(error = %err, "PING failed");
            return Step::Backoff;
        }
        self.pong.reset();
        Step::Continue
    }

    async fn handle_command(&mut self, command: Command) -> Step {
        let Command::Listen {
            nonce,
            data,
            waiter,
        } = command;

        let request = Request::Listen {
            nonce: nonce.clone(),
            data: data.clone(),
        };
        debug!(%nonce, topics = ?data.topics, "sending LISTEN");
        self.pending.insert(
            nonce,
            Pending { data, waiter },
        );
        if let Err(err) = self.write(&request).await {
            warn!(error = %err, "LISTEN failed");
            return Step::Backoff;
        }
        Step::Continue
    }

    fn handle_message(&mut self, message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) -> Step {
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                warn!(?frame, "pubsub socket closed by server");
                return Step::Backoff;
            }
            Some(Ok(_)) => return Step::Continue,
            Some(Err(err)) => {
                warn!(error = %err, "pubsub read failed");
                return Step::Backoff;
            }
            None => {
                warn!("pubsub socket ended");
                return Step::Backoff;
            }
        };

        match serde_json::from_str::<Event>(text.as_str()) {
            Ok(event) => self.handle_event(event),
            Err(err) => {
                warn!(error = %err, "undecodable pubsub frame");
                Step::Continue
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Step {
        if let Some(pending) = self.pending.remove(&event.nonce) {
            if event.error.is_empty() {
                self.track(pending.data);
            } else {
                warn!(nonce = %event.nonce, error = %event.error, "LISTEN rejected");
            }
            let _ = pending.waiter.send(event);
            return Step::Continue;
        }

        match event.kind {
            EventType::Pong => {
                trace!("PONG");
                self.pong.disarm();
            }
            EventType::Reconnect => {
                info!("server requested reconnect");
                return Step::Reconnect;
            }
            EventType::Message => self.dispatch(event.data),
            EventType::Response => debug!(nonce = %event.nonce, "response without pending request"),
            EventType::Other(kind) => debug!(%kind, "ignoring pubsub frame"),
        }
        Step::Continue
    }

    fn track(&mut self, data: ListenData) {
        self.tracked
            .entry(data.auth_token)
            .or_default()
            .extend(data.topics);
    }

    fn is_tracked(&self, topic: &str) -> bool {
        self.tracked.values().any(|topics| topics.contains(topic))
    }

    fn dispatch(&mut self, data: serde_json::Value) {
        let data: MessageData = match serde_json::from_value(data) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "undecodable MESSAGE data");
                return;
            }
        };
        if !self.is_tracked(&data.topic) {
            debug!(topic = %data.topic, "message on untracked topic");
            return;
        }
        match PubSubMessage::decode(&data) {
            Ok(message) => self.handler.on_message(&data.topic, message),
            Err(err) => warn!(topic = %data.topic, error = %err, "undecodable topic message"),
        }
    }

    /// Replaces the socket and re-listens every tracked topic.
    ///
    /// Requests still waiting for a response are listened again on the new
    /// socket and kept only if the server accepts them. Returns the step the
    /// held messages ask for, or [`Step::Stop`] when cancelled.
    async fn reconnect(&mut self) -> Step {
        // Dropping the waiters reports the loss to callers.
        for (nonce, pending) in std::mem::take(&mut self.pending) {
            debug!(%nonce, topics = ?pending.data.topics, "LISTEN abandoned by reconnect");
            self.track(pending.data);
        }

        loop {
            let _ = self.ws.close(None).await;
            self.pong.disarm();

            match self.resubscribe().await {
                Ok(()) => {
                    let count = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(reconnects = count, "pubsub reconnected");
                    let mut next = Step::Continue;
                    for event in std::mem::take(&mut self.held) {
                        let step = self.handle_event(event);
                        if matches!(next, Step::Continue) {
                            next = step;
                        }
                    }
                    return next;
                }
                Err(SourceError::Cancelled) => return Step::Stop,
                Err(err) => {
                    warn!(error = %err, backoff = ?self.config.retry_backoff, "pubsub reconnect failed");
                    tokio::select! {
                        () = self.cancel.cancelled() => return Step::Stop,
                        () = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
            }
        }
    }

    async fn resubscribe(&mut self) -> SourceResult<()> {
        let url = websocket_url(&self.config.url)?;
        self.ws = tokio::select! {
            () = self.cancel.cancelled() => return Err(SourceError::Cancelled),
            connected = connect_async(url.as_str()) => connected?.0,
        };

        // Nonce of each re-issued LISTEN to its auth token.
        let mut awaiting = HashMap::new();
        let tracked: Vec<(String, Vec<String>)> = self
            .tracked
            .iter()
            .map(|(token, topics)| (token.clone(), topics.iter().cloned().collect()))
            .collect();
        for (auth_token, topics) in tracked {
            let nonce = Uuid::new_v4().to_string();
            debug!(%nonce, ?topics, "re-sending LISTEN");
            self.write(&Request::Listen {
                nonce: nonce.clone(),
                data: ListenData {
                    topics,
                    auth_token: auth_token.clone(),
                },
            })
            .await?;
            awaiting.insert(nonce, auth_token);
        }

        let request_timeout = self.config.request_timeout;
        let acked = tokio::time::timeout(request_timeout, self.await_acks(&mut awaiting)).await;
        match acked {
            Ok(result) => result,
            Err(_) => Err(SourceError::CorrelationTimeout {
                nonce: awaiting.into_keys().next().unwrap_or_default(),
                timeout: request_timeout,
            }),
        }
    }

    /// Reads until every re-LISTEN is answered.
    ///
    /// A server RECONNECT ends the wait early. It is held so the replay
    /// reconnects again, and the unanswered topics stay tracked.
    async fn await_acks(&mut self, awaiting: &mut HashMap<String, String>) -> SourceResult<()> {
        while !awaiting.is_empty() {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return Err(SourceError::Cancelled),
                message = self.ws.next() => message,
            };
            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(SourceError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            };
            let event: Event = match serde_json::from_str(text.as_str()) {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "undecodable pubsub frame");
                    continue;
                }
            };

            if let Some(auth_token) = awaiting.remove(&event.nonce) {
                if !event.error.is_empty() {
                    warn!(error = %event.error, "re-LISTEN rejected, dropping tracked topics");
                    self.tracked.remove(&auth_token);
                }
                continue;
            }
            match event.kind {
                EventType::Reconnect => {
                    self.held.push(event);
                    return Ok(());
                }
                EventType::Message => self.held.push(event),
                _ => trace!(kind = ?event.kind, "frame during re-listen"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type ServerWs = WebSocketStream<TcpStream>;

    async fn ws_server() -> (String, mpsc::UnboundedReceiver<ServerWs>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = accept_async(stream).await.unwrap();
                if tx.send(ws).is_err() {
                    break;
                }
            }
        });
        (url, rx)
    }

    async fn next_conn(conns: &mut mpsc::UnboundedReceiver<ServerWs>) -> ServerWs {
        tokio::time::timeout(Duration::from_secs(5), conns.recv())
            .await
            .expect("no connection")
            .unwrap()
    }

    /// Reads client requests until one of type `kind`.
    async fn next_request(conn: &mut ServerWs, kind: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match conn.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(text.as_str()).unwrap();
                        if value["type"] == kind {
                            return value;
                        }
                    }
                    Some(Ok(_)) => {}
                    other => panic!("connection ended: {other:?}"),
                }
            }
        })
        .await
        .expect("no request")
    }

    async fn respond(conn: &mut ServerWs, nonce: &Value, error: &str) {
        let reply = json!({"type": "RESPONSE", "nonce": nonce, "error": error});
        conn.send(Message::text(reply.to_string())).await.unwrap();
    }

    fn redemption(topic: &str, title: &str) -> Message {
        let inner = json!({
            "type": "reward-redeemed",
            "data": {"redemption": {
                "id": "r",
                "user": {"id": "1", "login": "some viewer"},
                "reward": {"id": "w", "title": title}
            }}
        });
        Message::text(
            json!({"type": "MESSAGE", "data": {"topic": topic, "message": inner.to_string()}})
                .to_string(),
        )
    }

    struct Collect(mpsc::UnboundedSender<(String, PubSubMessage)>);

    impl PubSubHandler for Collect {
        fn on_message(&mut self, topic: &str, message: PubSubMessage) {
            let _ = self.0.send((topic.to_string(), message));
        }
    }

    async fn next_title(rx: &mut mpsc::UnboundedReceiver<(String, PubSubMessage)>) -> String {
        let (_, message) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no message")
            .unwrap();
        match message {
            PubSubMessage::RewardRedeemed(redeemed) => redeemed.redemption.reward.title,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn start(
        config: PubSubConfig,
    ) -> (
        PubSubClient,
        mpsc::UnboundedReceiver<(String, PubSubMessage)>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let client = PubSubClient::connect(config, Collect(tx), &cancel).await.unwrap();
        (client, rx, cancel)
    }

    #[test]
    fn channel_points_topic_name() {
        assert_eq!(channel_points_topic("42"), "channel-points-channel-v1.42");
    }

    #[tokio::test]
    async fn non_websocket_url_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = PubSubClient::connect(
            PubSubConfig::default().with_url("https://pubsub-edge.twitch.tv"),
            Collect(tx),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedScheme(ref s) if s == "https"));
    }

    #[tokio::test]
    async fn listen_is_correlated_by_nonce() {
        let (url, mut conns) = ws_server().await;
        let (client, mut rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let mut conn = next_conn(&mut conns).await;

        let listen = tokio::spawn(async move {
            let result = client.listen("oauth:tok", vec!["topic.a".into()]).await;
            (client, result)
        });
        let request = next_request(&mut conn, "LISTEN").await;
        assert_eq!(request["data"]["topics"], json!(["topic.a"]));
        assert_eq!(request["data"]["auth_token"], "tok");

        // A response for a different nonce does not resolve the waiter.
        respond(&mut conn, &json!("someone-else"), "").await;
        respond(&mut conn, &request["nonce"], "").await;
        let (client, result) = listen.await.unwrap();
        result.unwrap();

        conn.send(redemption("untracked", "ignored")).await.unwrap();
        conn.send(redemption("topic.a", "Hydrate")).await.unwrap();
        assert_eq!(next_title(&mut rx).await, "Hydrate");
        client.close().await;
    }

    #[tokio::test]
    async fn listen_error_is_rejection() {
        let (url, mut conns) = ws_server().await;
        let (client, _rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let mut conn = next_conn(&mut conns).await;

        let (result, ()) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            let request = next_request(&mut conn, "LISTEN").await;
            respond(&mut conn, &request["nonce"], "ERR_BADAUTH").await;
        });
        assert!(matches!(result, Err(SourceError::SubscribeRejected(ref e)) if e == "ERR_BADAUTH"));
    }

    #[tokio::test]
    async fn unanswered_listen_times_out() {
        let (url, mut conns) = ws_server().await;
        let (client, _rx, _cancel) = start(
            PubSubConfig::default()
                .with_url(&url)
                .with_request_timeout(Duration::from_millis(100)),
        )
        .await;
        let _conn = next_conn(&mut conns).await;

        let err = client.listen("tok", vec!["topic.a".into()]).await.unwrap_err();
        assert!(matches!(err, SourceError::CorrelationTimeout { .. }));
    }

    #[tokio::test]
    async fn missing_pong_reconnects_and_relistens() {
        let (url, mut conns) = ws_server().await;
        let (client, mut rx, _cancel) = start(
            PubSubConfig::default()
                .with_url(&url)
                .with_ping(Duration::from_secs(3600), Duration::from_millis(300)),
        )
        .await;
        let mut first = next_conn(&mut conns).await;

        let (result, ()) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            let request = next_request(&mut first, "LISTEN").await;
            respond(&mut first, &request["nonce"], "").await;
        });
        result.unwrap();
        // PING is never answered on the first connection.

        let mut second = next_conn(&mut conns).await;
        let relisten = next_request(&mut second, "LISTEN").await;
        assert_eq!(relisten["data"]["topics"], json!(["topic.a"]));
        assert_eq!(relisten["data"]["auth_token"], "tok");

        // Delivery resumes only after the re-listen is acknowledged.
        second.send(redemption("topic.a", "held")).await.unwrap();
        respond(&mut second, &relisten["nonce"], "").await;
        assert_eq!(next_title(&mut rx).await, "held");
        assert_eq!(client.reconnects(), 1);
    }

    #[tokio::test]
    async fn pong_keeps_connection() {
        let (url, mut conns) = ws_server().await;
        let (client, _rx, _cancel) = start(
            PubSubConfig::default()
                .with_url(&url)
                .with_ping(Duration::from_secs(3600), Duration::from_millis(200)),
        )
        .await;
        let mut conn = next_conn(&mut conns).await;
        next_request(&mut conn, "PING").await;
        conn.send(Message::text(r#"{"type":"PONG"}"#)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.reconnects(), 0);
    }

    #[tokio::test]
    async fn request_lost_to_reconnect_is_listened_again() {
        let (url, mut conns) = ws_server().await;
        let (client, mut rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let mut first = next_conn(&mut conns).await;

        let (result, original) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            let request = next_request(&mut first, "LISTEN").await;
            first
                .send(Message::text(r#"{"type":"RECONNECT"}"#))
                .await
                .unwrap();
            request["nonce"].clone()
        });
        assert!(matches!(result, Err(SourceError::CorrelationLost { .. })));

        let mut second = next_conn(&mut conns).await;
        let relisten = next_request(&mut second, "LISTEN").await;
        assert_eq!(relisten["data"]["topics"], json!(["topic.a"]));
        assert_eq!(relisten["data"]["auth_token"], "tok");
        assert_ne!(relisten["nonce"], original);

        respond(&mut second, &relisten["nonce"], "").await;
        second.send(redemption("topic.a", "kept")).await.unwrap();
        assert_eq!(next_title(&mut rx).await, "kept");
        assert_eq!(client.reconnects(), 1);
    }

    #[tokio::test]
    async fn rejected_relisten_of_lost_request_is_dropped() {
        let (url, mut conns) = ws_server().await;
        let (client, mut rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let mut first = next_conn(&mut conns).await;

        let (result, ()) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            next_request(&mut first, "LISTEN").await;
            first
                .send(Message::text(r#"{"type":"RECONNECT"}"#))
                .await
                .unwrap();
        });
        assert!(result.is_err());

        let mut second = next_conn(&mut conns).await;
        let relisten = next_request(&mut second, "LISTEN").await;
        respond(&mut second, &relisten["nonce"], "ERR_BADAUTH").await;

        second.send(redemption("topic.a", "dropped")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_during_relisten_reconnects_again() {
        let (url, mut conns) = ws_server().await;
        // Only an immediate reconnect reaches the third connection in time.
        let (client, mut rx, _cancel) = start(
            PubSubConfig::default()
                .with_url(&url)
                .with_retry_backoff(Duration::from_secs(3600)),
        )
        .await;
        let mut first = next_conn(&mut conns).await;

        let (result, ()) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            let request = next_request(&mut first, "LISTEN").await;
            respond(&mut first, &request["nonce"], "").await;
        });
        result.unwrap();
        first
            .send(Message::text(r#"{"type":"RECONNECT"}"#))
            .await
            .unwrap();

        let mut second = next_conn(&mut conns).await;
        next_request(&mut second, "LISTEN").await;
        second.send(redemption("topic.a", "before")).await.unwrap();
        second
            .send(Message::text(r#"{"type":"RECONNECT"}"#))
            .await
            .unwrap();
        assert_eq!(next_title(&mut rx).await, "before");

        let mut third = next_conn(&mut conns).await;
        let relisten = next_request(&mut third, "LISTEN").await;
        assert_eq!(relisten["data"]["topics"], json!(["topic.a"]));
        respond(&mut third, &relisten["nonce"], "").await;
        third.send(redemption("topic.a", "after")).await.unwrap();
        assert_eq!(next_title(&mut rx).await, "after");
        assert_eq!(client.reconnects(), 2);
    }

    #[tokio::test]
    async fn closed_socket_retries_with_backoff() {
        let (url, mut conns) = ws_server().await;
        let (client, mut rx, _cancel) = start(
            PubSubConfig::default()
                .with_url(&url)
                .with_retry_backoff(Duration::from_millis(50)),
        )
        .await;
        let mut first = next_conn(&mut conns).await;
        let (result, ()) = tokio::join!(client.listen("tok", vec!["topic.a".into()]), async {
            let request = next_request(&mut first, "LISTEN").await;
            respond(&mut first, &request["nonce"], "").await;
        });
        result.unwrap();
        first.close(None).await.unwrap();

        let mut second = next_conn(&mut conns).await;
        let relisten = next_request(&mut second, "LISTEN").await;
        respond(&mut second, &relisten["nonce"], "").await;
        second.send(redemption("topic.a", "again")).await.unwrap();
        assert_eq!(next_title(&mut rx).await, "again");
    }

    #[tokio::test]
    async fn channel_points_requires_scope() {
        let (url, mut conns) = ws_server().await;
        let (client, _rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let _conn = next_conn(&mut conns).await;

        let rest = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_id": "c",
                "login": "streamer",
                "scopes": ["chat:read"],
                "user_id": "42",
                "expires_in": 100
            })))
            .mount(&rest)
            .await;
        let helix = HelixClient::new("tok")
            .unwrap()
            .with_oauth_url(format!("{}/oauth2", rest.uri()));

        let err = client.subscribe_channel_points(&helix).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingScope(ref s) if s == CHANNEL_POINTS_SCOPE));
    }

    #[tokio::test]
    async fn channel_points_listens_on_user_topic() {
        let (url, mut conns) = ws_server().await;
        let (client, _rx, _cancel) = start(PubSubConfig::default().with_url(&url)).await;
        let mut conn = next_conn(&mut conns).await;

        let rest = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_id": "c",
                "login": "streamer",
                "scopes": [CHANNEL_POINTS_SCOPE],
                "user_id": "42",
                "expires_in": 100
            })))
            .mount(&rest)
            .await;
        let helix = HelixClient::new("oauth:tok")
            .unwrap()
            .with_oauth_url(format!("{}/oauth2", rest.uri()));

        let (result, ()) = tokio::join!(client.subscribe_channel_points(&helix), async {
            let request = next_request(&mut conn, "LISTEN").await;
            assert_eq!(request["data"]["topics"], json!(["channel-points-channel-v1.42"]));
            respond(&mut conn, &request["nonce"], "").await;
        });
        assert_eq!(result.unwrap().user_id, "42");
    }
}
