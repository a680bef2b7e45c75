//! Chat connection over a websocket.
//!
//! A [`ChatSession`] drives the capability, login and join handshake, answers
//! server pings, and broadcasts every decoded line to the registered
//! [`Subscription`]s. Sends are gated by a [`RateLimiter`].

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::message::{ChatMessage, decode};
use super::parser::parse_line;
use super::ratelimit::{RateLimiter, RateLimits};
use crate::endpoint::websocket_url;
use crate::error::{SourceError, SourceResult};

pub const DEFAULT_CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Capacity of each subscriber queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 20;

const IMPROPER_AUTH_NOTICE: &str = "Improperly formatted auth";

/// How long a cancelled read loop gets to exit before it is aborted.
const READ_LOOP_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Handshake progress of a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatState {
    Disconnected,
    Connecting,
    CapRequested,
    CapAcked,
    Authenticating,
    Authenticated,
    Joining(String),
    Joined(String),
}

/// Connection settings for a [`ChatSession`].
#[derive(Clone)]
pub struct ChatConfig {
    pub url: String,
    pub nick: String,
    token: String,
    pub handshake_timeout: Duration,
    pub join_timeout: Duration,
    pub close_timeout: Duration,
    pub rate_limits: RateLimits,
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("url", &self.url)
            .field("nick", &self.nick)
            .field("token", &"***")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("close_timeout", &self.close_timeout)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

impl ChatConfig {
    /// Creates settings for `nick`. A leading `oauth:` on the token is dropped.
    pub fn new(nick: impl Into<String>, token: &str) -> Self {
        Self {
            url: DEFAULT_CHAT_URL.to_string(),
            nick: nick.into(),
            token: token.trim_start_matches("oauth:").to_string(),
            handshake_timeout: Duration::from_secs(20),
            join_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(20),
            rate_limits: RateLimits::default(),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = limits;
        self
    }
}

/// Hooks for raw traffic and dropped lines.
///
/// All methods default to no-ops.
pub trait ChatObserver: Send + Sync {
    /// A line could not be parsed or decoded, or ended the session.
    fn on_error(&self, line: &str, error: &SourceError) {
        let _ = (line, error);
    }

    /// A line is about to be written. Credentials are already redacted.
    fn on_send(&self, line: &str) {
        let _ = line;
    }

    /// A line was decoded and delivered to subscribers.
    fn on_received(&self, line: &str) {
        let _ = line;
    }
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ChatObserver for TracingObserver {
    fn on_error(&self, line: &str, error: &SourceError) {
        warn!(line, error = %error, "chat line rejected");
    }

    fn on_send(&self, line: &str) {
        trace!(line, "chat >");
    }

    fn on_received(&self, line: &str) {
        trace!(line, "chat <");
    }
}

fn redact(line: &str) -> &str {
    if line.starts_with("PASS ") {
        "PASS oauth:***"
    } else {
        line
    }
}

type SinkTable = HashMap<u64, mpsc::Sender<Arc<ChatMessage>>>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    sinks: Mutex<SinkTable>,
}

impl Subscribers {
    fn lock(&self) -> std::sync::MutexGuard<'_, SinkTable> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, tx);
        Subscription {
            id,
            registry: Arc::clone(self),
            rx,
        }
    }

    fn deliver(&self, message: &Arc<ChatMessage>) {
        for (id, sink) in self.lock().iter() {
            if sink.try_send(Arc::clone(message)).is_err() {
                warn!(subscriber = id, command = %message.command, "chat message dropped, subscriber queue full");
            }
        }
    }

    /// Drops every sender so all receivers observe end of stream.
    fn close_all(&self) {
        let closed = std::mem::take(&mut *self.lock());
        debug!(subscribers = closed.len(), "closed chat subscribers");
    }
}

/// A registered receiver of chat messages.
///
/// Dropping the subscription deregisters it.
pub struct Subscription {
    id: u64,
    registry: Arc<Subscribers>,
    rx: mpsc::Receiver<Arc<ChatMessage>>,
}

impl Subscription {
    /// Receives the next message. `None` once the connection has ended.
    pub async fn recv(&mut self) -> Option<Arc<ChatMessage>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ChatMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

struct Shared {
    subscribers: Arc<Subscribers>,
    observer: Arc<dyn ChatObserver>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    state: watch::Sender<ChatState>,
}

impl Shared {
    fn set_state(&self, state: ChatState) {
        debug!(?state, "chat state");
        self.state.send_replace(state);
    }

    async fn send_line(&self, line: &str) -> SourceResult<()> {
        self.observer.on_send(redact(line));
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(SourceError::NotConnected)?;
        sink.send(Message::text(line.to_string())).await?;
        Ok(())
    }

    async fn handle_line(&self, raw: &str) -> ControlFlow<()> {
        let line = match parse_line(raw) {
            Ok(line) => line,
            Err(e) => {
                self.observer.on_error(raw, &e.into());
                return ControlFlow::Continue(());
            }
        };

        match line.command.name.as_str() {
            "NOTICE"
                if line
                    .command
                    .args
                    .get(1)
                    .is_some_and(|text| text == IMPROPER_AUTH_NOTICE) =>
            {
                let error = SourceError::AuthenticationFailed("missing OAuth information".into());
                self.observer.on_error(raw, &error);
                return ControlFlow::Break(());
            }
            "PING" => {
                let Some(token) = line.command.args.first().filter(|t| !t.is_empty()) else {
                    let error = SourceError::Decode {
                        command: "PING".into(),
                        reason: "missing token",
                    };
                    self.observer.on_error(raw, &error);
                    return ControlFlow::Break(());
                };
                if let Err(e) = self.send_line(&format!("PONG :{token}")).await {
                    self.observer.on_error(raw, &e);
                    return ControlFlow::Break(());
                }
                return ControlFlow::Continue(());
            }
            _ => {}
        }

        match decode(line) {
            Ok(message) => {
                self.subscribers.deliver(&Arc::new(message));
                self.observer.on_received(raw);
            }
            Err(e) => self.observer.on_error(raw, &e),
        }
        ControlFlow::Continue(())
    }
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>, cancel: CancellationToken) {
    'frames: loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "chat connection closed");
                break;
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("ignoring binary chat frame");
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                shared.observer.on_error("", &SourceError::Transport(e));
                break;
            }
            None => break,
        };

        // One frame may carry several CRLF-terminated lines.
        for raw in text.as_str().lines() {
            if raw.is_empty() {
                continue;
            }
            if shared.handle_line(raw).await.is_break() {
                break 'frames;
            }
        }
    }

    shared.writer.lock().await.take();
    shared.subscribers.close_all();
    shared.set_state(ChatState::Disconnected);
    debug!("chat read loop exited");
}

async fn wait_for<F>(
    subscription: &mut Subscription,
    stage: &'static str,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> SourceResult<()>
where
    F: FnMut(&ChatMessage) -> Option<SourceResult<()>>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            () = &mut deadline => return Err(SourceError::HandshakeTimeout { stage }),
            message = subscription.recv() => match message {
                Some(message) => {
                    if let Some(result) = check(&message) {
                        return result;
                    }
                }
                None => return Err(SourceError::ConnectionClosed),
            },
        }
    }
}

/// One chat connection.
pub struct ChatSession {
    config: ChatConfig,
    shared: Arc<Shared>,
    limiter: Mutex<RateLimiter>,
    state_rx: watch::Receiver<ChatState>,
    reader: Option<(JoinHandle<()>, CancellationToken)>,
}

impl ChatSession {
    pub fn new(config: ChatConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: ChatConfig, observer: Arc<dyn ChatObserver>) -> Self {
        let (state, state_rx) = watch::channel(ChatState::Disconnected);
        let limiter = Mutex::new(RateLimiter::new(config.rate_limits));
        Self {
            config,
            shared: Arc::new(Shared {
                subscribers: Arc::default(),
                observer,
                writer: tokio::sync::Mutex::new(None),
                state,
            }),
            limiter,
            state_rx,
            reader: None,
        }
    }

    pub fn nick(&self) -> &str {
        &self.config.nick
    }

    pub fn state(&self) -> ChatState {
        self.state_rx.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ChatState> {
        self.state_rx.clone()
    }

    /// Registers a receiver for every decoded inbound message.
    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribers.register()
    }

    /// Opens the websocket and completes capability negotiation and login.
    ///
    /// Any previous connection is torn down first. On failure the
    /// connection is released and the session is back to
    /// [`ChatState::Disconnected`].
    pub async fn connect(&mut self, cancel: &CancellationToken) -> SourceResult<()> {
        self.teardown().await;
        self.shared.set_state(ChatState::Connecting);

        let result = self.open_and_login(cancel).await;
        if result.is_err() {
            self.teardown().await;
            self.shared.set_state(ChatState::Disconnected);
        }
        result
    }

    async fn open_and_login(&mut self, cancel: &CancellationToken) -> SourceResult<()> {
        let url = websocket_url(&self.config.url)?;
        let (ws, _response) = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            connected = connect_async(url.as_str()) => connected?,
        };
        info!(url = %self.config.url, "chat connected");

        let (sink, stream) = ws.split();
        *self.shared.writer.lock().await = Some(sink);
        let read_cancel = cancel.child_token();
        let handle = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            stream,
            read_cancel.clone(),
        ));
        self.reader = Some((handle, read_cancel));

        let mut handshake = self.subscribe();
        let timeout = self.config.handshake_timeout;

        self.shared.send_line("CAP REQ :twitch.tv/tags").await?;
        self.shared.set_state(ChatState::CapRequested);
        wait_for(&mut handshake, "CAP ACK", timeout, cancel, |m| {
            (m.command == "CAP" && m.args.get(1).is_some_and(|a| a == "ACK")).then_some(Ok(()))
        })
        .await?;
        self.shared.set_state(ChatState::CapAcked);

        self.shared
            .send_line(&format!("PASS oauth:{}", self.config.token))
            .await?;
        self.shared
            .send_line(&format!("NICK {}", self.config.nick))
            .await?;
        self.shared.set_state(ChatState::Authenticating);
        wait_for(&mut handshake, "authentication", timeout, cancel, |m| {
            if m.command == "376" {
                Some(Ok(()))
            } else if m.command == "NOTICE" && m.trailer.contains("failed") {
                Some(Err(SourceError::AuthenticationFailed(m.trailer.clone())))
            } else {
                None
            }
        })
        .await?;
        self.shared.set_state(ChatState::Authenticated);
        info!(nick = %self.config.nick, "chat authenticated");
        Ok(())
    }

    /// Joins `channel` and waits for the server to echo our own JOIN.
    pub async fn join(&self, channel: &str, cancel: &CancellationToken) -> SourceResult<()> {
        let channel = channel.trim_start_matches('#');
        let mut echo = self.subscribe();

        self.shared.set_state(ChatState::Joining(channel.to_string()));
        self.shared.send_line(&format!("JOIN #{channel}")).await?;

        let nick = &self.config.nick;
        let expected_prefix = format!("{nick}!{nick}@{nick}.tmi.twitch.tv");
        let target = format!("#{channel}");
        wait_for(&mut echo, "JOIN", self.config.join_timeout, cancel, |m| {
            (m.command == "JOIN"
                && m.prefix == expected_prefix
                && m.args.first().is_some_and(|a| *a == target))
            .then_some(Ok(()))
        })
        .await?;

        self.shared.set_state(ChatState::Joined(channel.to_string()));
        info!(channel, "joined chat channel");
        Ok(())
    }

    /// Connects, logs in and joins `channel`.
    ///
    /// On failure the caller starts over from a fresh `connect_and_join`.
    pub async fn connect_and_join(
        &mut self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> SourceResult<()> {
        self.connect(cancel).await?;
        if let Err(e) = self.join(channel, cancel).await {
            self.teardown().await;
            self.shared.set_state(ChatState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    /// Sends a chat message to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::RateExceeded`] without sending anything when
    /// the channel's bucket is empty.
    pub async fn send(&self, channel: &str, text: &str) -> SourceResult<()> {
        let channel = channel.trim_start_matches('#');
        let own_channel = self.config.nick.eq_ignore_ascii_case(channel);
        let allowed = self
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(own_channel);
        if !allowed {
            return Err(SourceError::RateExceeded);
        }
        self.shared
            .send_line(&format!("PRIVMSG #{channel} :{text}"))
            .await
    }

    /// Waits until the read loop exits on its own.
    pub async fn closed(&mut self) {
        if let Some((handle, _)) = self.reader.as_mut() {
            let _ = handle.await;
        }
        self.reader = None;
    }

    /// Sends a close frame and waits for the read loop to exit.
    ///
    /// # Errors
    ///
    /// [`SourceError::CloseTimeout`] if the read loop is still running after
    /// the configured close timeout. It is cancelled in that case, and has
    /// exited by the time this returns.
    pub async fn close(&mut self) -> SourceResult<()> {
        let Some((mut handle, read_cancel)) = self.reader.take() else {
            return Err(SourceError::NotConnected);
        };

        if let Some(mut sink) = self.shared.writer.lock().await.take()
            && let Err(e) = sink.send(Message::Close(None)).await
        {
            debug!(error = %e, "could not send close frame");
        }

        match tokio::time::timeout(self.config.close_timeout, &mut handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                read_cancel.cancel();
                if tokio::time::timeout(READ_LOOP_CANCEL_TIMEOUT, &mut handle)
                    .await
                    .is_err()
                {
                    warn!("chat read loop ignored cancellation, aborting it");
                    handle.abort();
                    let _ = handle.await;
                }
                Err(SourceError::CloseTimeout(self.config.close_timeout))
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some((handle, read_cancel)) = self.reader.take() {
            read_cancel.cancel();
            let _ = handle.await;
        }
        self.shared.writer.lock().await.take();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some((_, read_cancel)) = &self.reader {
            read_cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const NICK: &str = "demo";

    struct ServerHandle {
        url: String,
        received: mpsc::UnboundedReceiver<String>,
        push: mpsc::UnboundedSender<String>,
    }

    impl ServerHandle {
        async fn expect(&mut self, line: &str) {
            loop {
                let got = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                    .await
                    .expect("server saw nothing")
                    .expect("server gone");
                if got == line {
                    return;
                }
            }
        }
    }

    /// Accepts one connection and answers client lines with `respond`.
    async fn spawn_server<F>(respond: F) -> ServerHandle
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let line = text.as_str().to_string();
                            for reply in respond(&line) {
                                ws.send(Message::text(reply)).await.unwrap();
                            }
                            let _ = received_tx.send(line);
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    },
                    Some(line) = push_rx.recv() => {
                        ws.send(Message::text(line)).await.unwrap();
                    }
                }
            }
            // Flush the close reply.
            let _ = ws.close(None).await;
        });

        ServerHandle {
            url,
            received,
            push,
        }
    }

    fn twitch_like(line: &str) -> Vec<String> {
        if line == "CAP REQ :twitch.tv/tags" {
            vec![":tmi.twitch.tv CAP * ACK :twitch.tv/tags".into()]
        } else if line == format!("NICK {NICK}") {
            vec![format!(
                ":tmi.twitch.tv 001 {NICK} :Welcome, GLHF!\r\n:tmi.twitch.tv 376 {NICK} :>\r\n"
            )]
        } else if let Some(channel) = line.strip_prefix("JOIN ") {
            vec![format!(":{NICK}!{NICK}@{NICK}.tmi.twitch.tv JOIN {channel}")]
        } else {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl ChatObserver for Recorder {
        fn on_error(&self, line: &str, error: &SourceError) {
            self.errors.lock().unwrap().push(format!("{line} -> {error}"));
        }

        fn on_send(&self, line: &str) {
            self.sent.lock().unwrap().push(line.to_string());
        }
    }

    fn config(url: &str) -> ChatConfig {
        ChatConfig::new(NICK, "oauth:secret")
            .with_url(url)
            .with_handshake_timeout(Duration::from_secs(5))
            .with_join_timeout(Duration::from_secs(5))
            .with_close_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn handshake_join_ping_and_delivery() {
        let mut server = spawn_server(twitch_like).await;
        let recorder = Arc::new(Recorder::default());
        let mut session = ChatSession::with_observer(config(&server.url), recorder.clone());
        let cancel = CancellationToken::new();

        session.connect_and_join("#demo", &cancel).await.unwrap();
        assert_eq!(session.state(), ChatState::Joined("demo".into()));

        server.expect("CAP REQ :twitch.tv/tags").await;
        server.expect("PASS oauth:secret").await;
        server.expect("NICK demo").await;
        server.expect("JOIN #demo").await;

        let mut sub = session.subscribe();
        server.push.send("PING :tmi.twitch.tv".into()).unwrap();
        server.expect("PONG :tmi.twitch.tv").await;

        server
            .push
            .send(
                "@display-name=Viewer :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #demo :#hello there"
                    .into(),
            )
            .unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.sender, "viewer");
        assert_eq!(msg.channel, "demo");
        assert_eq!(msg.trailer, "#hello there");
        assert_eq!(msg.tag("display-name"), Some("Viewer"));

        let sent = recorder.sent.lock().unwrap().clone();
        assert!(sent.contains(&"PASS oauth:***".to_string()));
        assert!(!sent.iter().any(|l| l.contains("secret")));

        session.close().await.unwrap();
        assert_eq!(session.state(), ChatState::Disconnected);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_timeout_still_stops_read_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let line = text.as_str().to_string();
                for reply in twitch_like(&line) {
                    ws.send(Message::text(reply)).await.unwrap();
                }
                if line.starts_with("JOIN ") {
                    break;
                }
            }
            // Never read the close frame, so it is never answered.
            std::future::pending::<()>().await;
            drop(ws);
        });

        let mut session =
            ChatSession::new(config(&url).with_close_timeout(Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        session.connect_and_join("demo", &cancel).await.unwrap();
        let mut sub = session.subscribe();

        let err = session.close().await.unwrap_err();
        assert!(matches!(err, SourceError::CloseTimeout(_)));
        assert_eq!(session.state(), ChatState::Disconnected);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn back_to_back_sends_to_other_channel() {
        let mut server = spawn_server(twitch_like).await;
        let mut session = ChatSession::new(config(&server.url));
        let cancel = CancellationToken::new();
        session.connect(&cancel).await.unwrap();

        session.send("other", "hi").await.unwrap();
        assert!(matches!(
            session.send("other", "again").await,
            Err(SourceError::RateExceeded)
        ));
        // Own channel has its own bucket.
        session.send("DEMO", "mine").await.unwrap();

        server.expect("PRIVMSG #other :hi").await;
        server.expect("PRIVMSG #DEMO :mine").await;
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_login_notice() {
        let server = spawn_server(|line| {
            if line.starts_with("CAP REQ") {
                vec![":tmi.twitch.tv CAP * ACK :twitch.tv/tags".into()]
            } else if line.starts_with("NICK") {
                vec![":tmi.twitch.tv NOTICE * :Login authentication failed".into()]
            } else {
                Vec::new()
            }
        })
        .await;
        let mut session = ChatSession::new(config(&server.url));

        let err = session.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthenticationFailed(ref t) if t.contains("failed")));
        assert_eq!(session.state(), ChatState::Disconnected);
    }

    #[tokio::test]
    async fn missing_cap_ack_times_out() {
        let server = spawn_server(|_| Vec::new()).await;
        let mut session = ChatSession::new(
            config(&server.url).with_handshake_timeout(Duration::from_millis(100)),
        );

        let err = session.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::HandshakeTimeout { stage: "CAP ACK" }));
    }

    #[tokio::test]
    async fn cancellation_aborts_handshake() {
        let server = spawn_server(|_| Vec::new()).await;
        let mut session = ChatSession::new(config(&server.url));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = session.connect(&cancel).await.unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
    }

    #[tokio::test]
    async fn improperly_formatted_auth_ends_session() {
        let server = spawn_server(twitch_like).await;
        let recorder = Arc::new(Recorder::default());
        let mut session = ChatSession::with_observer(config(&server.url), recorder.clone());
        session.connect(&CancellationToken::new()).await.unwrap();
        let mut sub = session.subscribe();

        server
            .push
            .send(":tmi.twitch.tv NOTICE * :Improperly formatted auth".into())
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert!(sub.recv().await.is_none());
        assert_eq!(session.state(), ChatState::Disconnected);
        assert!(
            recorder
                .errors
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.contains("Improperly formatted auth"))
        );
    }

    #[test]
    fn config_strips_oauth_prefix_and_hides_token() {
        let config = ChatConfig::new("demo", "oauth:abc");
        assert_eq!(config.token, "abc");
        assert!(!format!("{config:?}").contains("abc"));
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let session = ChatSession::new(ChatConfig::new("demo", "t"));
        let sub = session.subscribe();
        assert_eq!(session.shared.subscribers.lock().len(), 1);
        drop(sub);
        assert!(session.shared.subscribers.lock().is_empty());
    }
}
