//! Retry with exponential backoff for idempotent backend calls.
//!
//! Only errors the caller's predicate marks retriable are retried, and only
//! up to `max_attempts`. Backoff doubles per attempt and is capped at
//! `max_delay`. The sleep races the cancellation token so a cancelled
//! request never lingers in a backoff.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// The delay to apply before the given retry attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` with retries for retriable failures.
///
/// `op` is a closure producing a fresh future per attempt. Returns the first
/// success, the first non-retriable error, or the last error once attempts
/// are exhausted. If the token is cancelled mid-backoff, the last error is
/// returned immediately.
///
/// # Errors
///
/// Propagates the operation's error as described above.
pub async fn retry<T, E, Op, Fut, P>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    retriable: P,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retriable(&err) || attempt == attempts {
                    return Err(err);
                }
                tracing::debug!(attempt, "retriable backend failure, backing off");
                last_err = Some(err);
                tokio::select! {
                    () = cancel.cancelled() => {
                        break;
                    }
                    () = tokio::time::sleep(config.delay_for(attempt)) => {}
                }
            },
        }
    }

    // Only reachable via cancellation; attempts exhaustion returns above.
    match last_err {
        Some(err) => Err(err),
        None => unreachable!("retry loop ran at least once"),
    }
}
