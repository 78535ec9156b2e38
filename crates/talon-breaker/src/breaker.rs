//! The breaker state machine.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow; matched failures are counted.
    Closed,
    /// Calls fail fast until the recovery window elapses.
    Open,
    /// A limited probe is in flight; successes close, any failure reopens.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Matched failures before opening.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a probe is allowed.
    pub recovery_timeout: Duration,
    /// Successes in half-open before closing.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] when the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Seconds until the recovery window elapses.
    pub retry_after_seconds: u64,
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// One breaker, guarding one backend service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    state: Mutex<State>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named service.
    #[must_use]
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// The guarded service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gate a call attempt.
    ///
    /// Closed and half-open admit. Open admits only once the recovery
    /// window has elapsed, transitioning to half-open — the first caller
    /// to observe the elapsed window wins the probe slot.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] with the remaining wait while the breaker is
    /// open.
    pub fn try_acquire(&self) -> Result<(), Rejected> {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> Result<(), Rejected> {
        let Ok(mut state) = self.state.lock() else {
            return Ok(());
        };
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.settings.recovery_timeout {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    tracing::info!(service = %self.name, "circuit breaker half-open, probing");
                    Ok(())
                } else {
                    let remaining = self.settings.recovery_timeout.saturating_sub(elapsed);
                    Err(Rejected {
                        retry_after_seconds: remaining.as_secs().max(1),
                    })
                }
            },
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            },
            CircuitState::HalfOpen => {
                state.success_count = state.success_count.saturating_add(1);
                if state.success_count >= self.settings.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                    tracing::info!(service = %self.name, "circuit breaker closed");
                }
            },
            CircuitState::Open => {
                // A success from a call admitted before the breaker opened;
                // the open state stands until the recovery window elapses.
            },
        }
    }

    /// Record a matched failure.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match state.state {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_add(1);
                if state.failure_count >= self.settings.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(now);
                    tracing::warn!(
                        service = %self.name,
                        failures = state.failure_count,
                        "circuit breaker opened"
                    );
                }
            },
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.opened_at = Some(now);
                state.success_count = 0;
                tracing::warn!(service = %self.name, "probe failed, circuit breaker reopened");
            },
            CircuitState::Open => {
                // Late failure from an already-admitted call; last writer
                // wins on opened_at, which lands in the same open state.
                state.opened_at = Some(now);
            },
        }
    }

    /// Current state (snapshot; may be stale the moment it returns).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().map_or(CircuitState::Closed, |s| s.state)
    }

    /// Counters for the status tool: (state, failures, successes).
    #[must_use]
    pub fn counters(&self) -> (CircuitState, u32, u32) {
        self.state.lock().map_or(
            (CircuitState::Closed, 0, 0),
            |s| (s.state, s.failure_count, s.success_count),
        )
    }

    /// Guard a backend future with this breaker.
    ///
    /// `matched` classifies errors: `true` counts against the breaker.
    /// When the breaker is open the future is never polled and the
    /// rejection is mapped into the caller's error type via `on_open`.
    ///
    /// # Errors
    ///
    /// Returns `on_open(rejected)` while open, or the operation's error.
    pub async fn guard<T, E, Fut, P, O>(
        &self,
        matched: P,
        on_open: O,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        O: FnOnce(Rejected) -> E,
    {
        if let Err(rejected) = self.try_acquire() {
            return Err(on_open(rejected));
        }
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(err) => {
                if matched(&err) {
                    self.record_failure();
                }
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new("es", settings());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("es", settings());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_fails_fast_until_recovery() {
        let breaker = CircuitBreaker::new("es", settings());
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }
        let rejected = breaker.try_acquire_at(start + Duration::from_secs(10)).unwrap_err();
        assert!(rejected.retry_after_seconds >= 1);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_recovery_window_transitions_to_half_open() {
        let breaker = CircuitBreaker::new("es", settings());
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }
        assert!(breaker.try_acquire_at(start + Duration::from_secs(61)).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("es", settings());
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }
        breaker.try_acquire_at(start + Duration::from_secs(61)).unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("es", settings());
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }
        breaker.try_acquire_at(start + Duration::from_secs(61)).unwrap();
        breaker.record_failure_at(start + Duration::from_secs(62));
        assert_eq!(breaker.state(), CircuitState::Open);
        // The reopen resets the window from the failure time.
        assert!(breaker.try_acquire_at(start + Duration::from_secs(90)).is_err());
        assert!(breaker.try_acquire_at(start + Duration::from_secs(123)).is_ok());
    }

    #[tokio::test]
    async fn test_guard_counts_only_matched_failures() {
        let breaker = CircuitBreaker::new("es", settings());
        for _ in 0..5 {
            let result: Result<(), &str> = breaker
                .guard(|e| *e == "transient", |_| "open", async { Err("validation") })
                .await;
            assert_eq!(result, Err("validation"));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_guard_fails_fast_when_open() {
        let breaker = CircuitBreaker::new("es", settings());
        for _ in 0..3 {
            let _: Result<(), &str> = breaker
                .guard(|_| true, |_| "open", async { Err("down") })
                .await;
        }
        let called = std::sync::atomic::AtomicBool::new(false);
        let result: Result<(), &str> = breaker
            .guard(|_| true, |_| "open", async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Err("down")
            })
            .await;
        assert_eq!(result, Err("open"));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
