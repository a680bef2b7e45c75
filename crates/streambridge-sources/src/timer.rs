//! A resettable deadline owned by a single state machine.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// A one-shot deadline that can be re-armed.
///
/// A disarmed deadline never fires, so `expired()` can sit in a `select!`
/// unconditionally.
#[derive(Debug, Clone)]
pub struct Deadline {
    duration: Duration,
    at: Option<Instant>,
}

impl Deadline {
    /// Creates a disarmed deadline.
    pub fn new(duration: Duration) -> Self {
        Self { duration, at: None }
    }

    /// Creates a deadline armed from now.
    pub fn armed(duration: Duration) -> Self {
        let mut deadline = Self::new(duration);
        deadline.reset();
        deadline
    }

    /// Arms the deadline to fire `duration` from now.
    pub fn reset(&mut self) {
        self.at = Some(Instant::now() + self.duration);
    }

    /// Changes the duration used by subsequent resets.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Completes when the deadline passes. Pending forever while disarmed.
    pub async fn expired(&self) {
        match self.at {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
