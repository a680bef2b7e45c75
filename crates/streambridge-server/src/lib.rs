//! Connector daemon.
//!
//! This crate wires the upstream clients to local consumers:
//! - upstream services (chat, EventSub, PubSub) normalizing into envelopes
//! - the broker topic every envelope is published to
//! - a Unix socket exporting the topic as length-prefixed frames
//!
//! # Example
//!
//! ```rust,no_run
//! use streambridge_core::Broker;
//! use streambridge_server::{ExportConfig, ExportServer, default_socket_path};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new();
//!     let server = ExportServer::new(ExportConfig::new(default_socket_path()), broker).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod export;
pub mod handlers;
mod services;
mod signals;

pub use config::{
    ChannelPointsSource, ConnectorConfig, EVENTS_TOPIC, ExportConfig, StreamElementsConfig,
    TwitchConfig, default_socket_path,
};
pub use error::{ServerError, ServerResult};
pub use export::{ExportServer, ExportSession};
pub use handlers::{EventSubPublisher, PubSubPublisher, Publisher};
pub use services::{DEFAULT_STOP_GRACE, ServiceManager};
pub use signals::SignalHandler;
