//! Connector configuration.
//!
//! Everything lives in one `config.toml`, by default at
//! `$XDG_CONFIG_HOME/streambridge/config.toml`. A missing file means
//! defaults; every section and key may be omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use streambridge_protocol::default_socket_path;
use streambridge_sources::eventsub::{DEFAULT_EVENTSUB_URL, EventSubConfig};
use streambridge_sources::helix::{DEFAULT_HELIX_URL, DEFAULT_OAUTH_URL};
use streambridge_sources::irc::DEFAULT_CHAT_URL;
use streambridge_sources::pubsub::{DEFAULT_PUBSUB_URL, PubSubConfig};

use crate::error::{ServerError, ServerResult};

/// Broker topic every normalized envelope is published to.
pub const EVENTS_TOPIC: &str = "events";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Raise the log level to DEBUG.
    pub debug: bool,
    pub export: ExportConfig,
    pub twitch: TwitchConfig,
    pub streamelements: StreamElementsConfig,
}

impl ConnectorConfig {
    /// Loads `path`, or the default path when `None`. A missing file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads a specific file, which must exist.
    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            ServerError::config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ServerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ServerError::config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("streambridge")
            .join("config.toml")
    }
}

/// Local export socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub socket_path: PathBuf,
    /// Idle seconds before a keepalive frame is written.
    pub keepalive_secs: u64,
    /// Queue length of each consumer's sink.
    pub sink_capacity: usize,
    pub max_connections: usize,
    /// Broker topics forwarded to every consumer.
    pub topics: Vec<String>,
    /// Remove a leftover socket file nobody is listening on.
    pub cleanup_stale_socket: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            keepalive_secs: 5,
            sink_capacity: 10,
            max_connections: 100,
            topics: vec![EVENTS_TOPIC.to_string()],
            cleanup_stale_socket: true,
        }
    }
}

impl ExportConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    #[must_use]
    pub fn with_keepalive_secs(mut self, secs: u64) -> Self {
        self.keepalive_secs = secs;
        self
    }

    #[must_use]
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }
}

/// Which client delivers channel point redemptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPointsSource {
    #[default]
    EventSub,
    PubSub,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    /// Chat channel to join.
    pub channel: String,
    pub oauth_token: String,
    pub chat: bool,
    pub channel_points: bool,
    pub bits: bool,
    pub channel_points_source: ChannelPointsSource,
    /// Chat lines starting with this are forwarded as commands.
    pub command_prefix: String,
    pub chat_url: String,
    pub eventsub_url: String,
    pub pubsub_url: String,
    pub helix_url: String,
    pub oauth_url: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            oauth_token: String::new(),
            chat: true,
            channel_points: true,
            bits: true,
            channel_points_source: ChannelPointsSource::EventSub,
            command_prefix: "#".to_string(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            eventsub_url: DEFAULT_EVENTSUB_URL.to_string(),
            pubsub_url: DEFAULT_PUBSUB_URL.to_string(),
            helix_url: DEFAULT_HELIX_URL.to_string(),
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("channel", &self.channel)
            .field("oauth_token", &redacted(&self.oauth_token))
            .field("chat", &self.chat)
            .field("channel_points", &self.channel_points)
            .field("bits", &self.bits)
            .field("channel_points_source", &self.channel_points_source)
            .field("command_prefix", &self.command_prefix)
            .field("chat_url", &self.chat_url)
            .field("eventsub_url", &self.eventsub_url)
            .field("pubsub_url", &self.pubsub_url)
            .field("helix_url", &self.helix_url)
            .field("oauth_url", &self.oauth_url)
            .finish()
    }
}

impl TwitchConfig {
    /// False for an empty token or a pasted token-generator URL.
    pub fn has_credentials(&self) -> bool {
        let token = self.oauth_token.trim();
        !token.is_empty() && !token.contains("id.twitch.tv")
    }

    pub fn eventsub_config(&self) -> EventSubConfig {
        EventSubConfig::default().with_url(&self.eventsub_url)
    }

    pub fn pubsub_config(&self) -> PubSubConfig {
        PubSubConfig::default().with_url(&self.pubsub_url)
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamElementsConfig {
    pub enabled: bool,
    /// JWT from the StreamElements dashboard.
    pub token: String,
    /// Channel name reported on perk events.
    pub channel: String,
}

impl std::fmt::Debug for StreamElementsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamElementsConfig")
            .field("enabled", &self.enabled)
            .field("token", &redacted(&self.token))
            .field("channel", &self.channel)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "***" }
}
