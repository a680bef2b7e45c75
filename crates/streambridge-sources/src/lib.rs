//! Upstream clients for the streaming platform.
//!
//! - [`irc`]: chat session, line parser and send rate limiting
//! - [`eventsub`]: EventSub websocket notifications
//! - [`pubsub`]: PubSub topic listener
//! - [`helix`]: REST calls shared by the two subscription clients
//! - [`streamelements`]: store redemption payloads
//!
//! Each client owns its connection state in a single task and is stopped
//! through a [`tokio_util::sync::CancellationToken`].

pub mod endpoint;
pub mod error;
pub mod eventsub;
pub mod helix;
pub mod irc;
pub mod pubsub;
pub mod streamelements;
pub mod timer;

pub use endpoint::websocket_url;
pub use error::{SourceError, SourceResult};
pub use helix::{HelixClient, TokenInfo};
pub use timer::Deadline;
