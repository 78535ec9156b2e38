//! Token bucket.

use std::time::{Duration, Instant};

/// A token bucket refilled continuously at `rate_per_minute / 60` tokens per
/// second, holding at most `burst` tokens.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    #[must_use]
    pub fn new(rate_per_minute: u32, burst: u32, now: Instant) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_second: f64::from(rate_per_minute) / 60.0,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Whether one token is available at `now` (without consuming).
    #[must_use]
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            Ok(())
        } else {
            Err(self.time_until_token())
        }
    }

    /// Consume one token. Callers must have observed `check() == Ok` under
    /// the same lock.
    pub fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// Tokens currently available (after refill at `now`).
    #[must_use]
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    fn time_until_token(&self) -> Duration {
        if self.refill_per_second <= 0.0 {
            // A zero-rate key can never be admitted again this minute.
            return Duration::from_secs(60);
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_second)
    }
}
