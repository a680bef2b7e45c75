//! Token-bucket limits for outbound chat messages.

use std::time::Duration;

use tokio::time::Instant;

/// Burst size and refill interval of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub burst: u32,
    /// Time to refill one token.
    pub interval: Duration,
}

impl Rate {
    pub const fn new(burst: u32, interval: Duration) -> Self {
        Self { burst, interval }
    }
}

/// Limits for the two kinds of channel a session sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Sending in the channel named after the session's own login.
    pub own_channel: Rate,
    /// Sending as a participant anywhere else.
    pub other_channel: Rate,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            own_channel: Rate::new(3, Duration::from_millis(333)),
            other_channel: Rate::new(1, Duration::from_secs(2)),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    rate: Rate,
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn new(rate: Rate) -> Self {
        Self {
            rate,
            tokens: f64::from(rate.burst),
            refilled_at: Instant::now(),
        }
    }

    fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at);
        self.refilled_at = now;
        if self.rate.interval.is_zero() {
            return true;
        }
        let refill = elapsed.as_secs_f64() / self.rate.interval.as_secs_f64();
        self.tokens = (self.tokens + refill).min(f64::from(self.rate.burst));

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// The two-tier limiter used by a chat session.
#[derive(Debug)]
pub struct RateLimiter {
    own_channel: TokenBucket,
    other_channel: TokenBucket,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            own_channel: TokenBucket::new(limits.own_channel),
            other_channel: TokenBucket::new(limits.other_channel),
        }
    }

    /// Takes a token from the matching bucket. Returns false when empty.
    pub fn try_acquire(&mut self, own_channel: bool) -> bool {
        let now = Instant::now();
        if own_channel {
            self.own_channel.try_take(now)
        } else {
            self.other_channel.try_take(now)
        }
    }
}
