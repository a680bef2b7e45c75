//! Import side of the export socket.
//!
//! [`ImportClient`] connects to the daemon, decodes each frame, and hands
//! envelopes to a [`Dispatch`] implementation supplied by the host.

pub mod cli;
pub mod dispatch;
pub mod error;
pub mod import;

pub use dispatch::{Dispatch, JsonLinesDispatch};
pub use error::{ClientError, ClientResult};
pub use import::{ImportClient, ImportStats, import};
