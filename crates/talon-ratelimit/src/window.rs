//! Sliding 60-second window counter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts admissions inside a sliding window; rejects once the count would
/// exceed the limit.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Create a window admitting at most `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            admitted: VecDeque::new(),
        }
    }

    /// A 60-second window, the server default.
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Whether another admission fits at `now` (without recording it).
    #[must_use]
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        self.evict(now);
        if self.admitted.len() < self.limit {
            Ok(())
        } else {
            // The window admits again once its oldest entry expires.
            let retry = self.admitted.front().map_or(self.window, |oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(*oldest))
            });
            Err(retry)
        }
    }

    /// Record an admission. Callers must have observed `check() == Ok`
    /// under the same lock.
    pub fn record(&mut self, now: Instant) {
        self.admitted.push_back(now);
    }

    /// Admissions currently inside the window.
    #[must_use]
    pub fn count(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.admitted.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
