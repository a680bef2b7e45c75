//! Core types: normalized events, the event broker, tracing setup.
//!
//! Every upstream integration reduces what it receives to one of the small
//! payloads in [`event`], and every payload travels through a [`Broker`] on
//! its way to local consumers.

pub mod broker;
pub mod event;
pub mod tracing;

pub use broker::{Broker, SinkHandle};
pub use event::{BitsEvent, ChatEvent, Redemption, compact_login, truncate_chars};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
