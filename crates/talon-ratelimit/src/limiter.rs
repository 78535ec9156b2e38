//! The composed rate limiter.
//!
//! All three limiters (per-key bucket, per-connection window, global window)
//! live behind one mutex so check-then-consume is atomic: a rejection by any
//! limiter charges none of them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use talon_core::{ConnectionId, KeyId};

/// Settings shared across all keys and connections.
#[derive(Debug, Clone)]
pub struct RateLimiterSettings {
    /// Global sliding-window cap per minute.
    pub global_per_minute: u32,
    /// Per-connection sliding-window cap per minute.
    pub connection_per_minute: u32,
}

/// Per-key limits, taken from the key record at authentication time.
#[derive(Debug, Clone, Copy)]
pub struct KeyLimits {
    /// Refill rate per minute.
    pub rate_per_minute: u32,
    /// Bucket capacity.
    pub burst: u32,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted; all limiters were charged.
    Allowed,
    /// Rejected by the named scope.
    Rejected {
        /// Which limiter rejected: `"key"`, `"connection"`, or `"global"`.
        scope: &'static str,
        /// Seconds until a retry may be admitted (at least 1).
        retry_after_seconds: u64,
    },
}

impl Decision {
    /// Whether the request was admitted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

struct Inner {
    key_buckets: HashMap<KeyId, super::TokenBucket>,
    connection_windows: HashMap<ConnectionId, super::SlidingWindow>,
    global: super::SlidingWindow,
}

/// The composed limiter. Thread-safe; all state behind one short mutex.
pub struct RateLimiter {
    settings: RateLimiterSettings,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(settings: RateLimiterSettings) -> Self {
        let global = super::SlidingWindow::per_minute(settings.global_per_minute);
        Self {
            settings,
            inner: Mutex::new(Inner {
                key_buckets: HashMap::new(),
                connection_windows: HashMap::new(),
                global,
            }),
        }
    }

    /// Check and (when admitted) charge all three limiters.
    pub fn allow(&self, key: &KeyId, limits: KeyLimits, connection: ConnectionId) -> Decision {
        self.allow_at(key, limits, connection, Instant::now())
    }

    /// Deterministic admission at an explicit instant.
    pub fn allow_at(
        &self,
        key: &KeyId,
        limits: KeyLimits,
        connection: ConnectionId,
        now: Instant,
    ) -> Decision {
        let Ok(mut inner) = self.inner.lock() else {
            // A poisoned limiter fails closed.
            return Decision::Rejected {
                scope: "global",
                retry_after_seconds: 1,
            };
        };

        let bucket = inner
            .key_buckets
            .entry(key.clone())
            .or_insert_with(|| super::TokenBucket::new(limits.rate_per_minute, limits.burst, now));
        let key_result = bucket.check(now);

        let connection_limit = self.settings.connection_per_minute;
        let window = inner
            .connection_windows
            .entry(connection)
            .or_insert_with(|| super::SlidingWindow::per_minute(connection_limit));
        let connection_result = window.check(now);

        let global_result = inner.global.check(now);

        // AND precedence: all three must admit. The retry hint is the max
        // over the rejecting limiters so a retry at that time passes all.
        let mut rejection: Option<(&'static str, Duration)> = None;
        for (scope, result) in [
            ("key", key_result),
            ("connection", connection_result),
            ("global", global_result),
        ] {
            if let Err(wait) = result {
                match rejection {
                    Some((_, worst)) if worst >= wait => {},
                    _ => rejection = Some((scope, wait)),
                }
            }
        }

        if let Some((scope, wait)) = rejection {
            tracing::debug!(key = %key, %connection, scope, "rate limit rejection");
            return Decision::Rejected {
                scope,
                retry_after_seconds: wait.as_secs().max(1),
            };
        }

        // All admitted: charge atomically under the same lock.
        if let Some(bucket) = inner.key_buckets.get_mut(key) {
            bucket.consume();
        }
        if let Some(window) = inner.connection_windows.get_mut(&connection) {
            window.record(now);
        }
        inner.global.record(now);
        Decision::Allowed
    }

    /// Admission for a pre-authentication request (no key yet): the
    /// per-connection and global windows only, still atomic.
    ///
    /// This is the gate on `authenticate` itself — it throttles key
    /// brute-forcing without letting a bad secret charge the claimed
    /// key's bucket.
    pub fn allow_unkeyed(&self, connection: ConnectionId) -> Decision {
        self.allow_unkeyed_at(connection, Instant::now())
    }

    /// Deterministic pre-authentication admission at an explicit instant.
    pub fn allow_unkeyed_at(&self, connection: ConnectionId, now: Instant) -> Decision {
        let Ok(mut inner) = self.inner.lock() else {
            // A poisoned limiter fails closed.
            return Decision::Rejected {
                scope: "global",
                retry_after_seconds: 1,
            };
        };

        let connection_limit = self.settings.connection_per_minute;
        let window = inner
            .connection_windows
            .entry(connection)
            .or_insert_with(|| super::SlidingWindow::per_minute(connection_limit));
        let connection_result = window.check(now);

        let global_result = inner.global.check(now);

        let mut rejection: Option<(&'static str, Duration)> = None;
        for (scope, result) in [
            ("connection", connection_result),
            ("global", global_result),
        ] {
            if let Err(wait) = result {
                match rejection {
                    Some((_, worst)) if worst >= wait => {},
                    _ => rejection = Some((scope, wait)),
                }
            }
        }

        if let Some((scope, wait)) = rejection {
            tracing::debug!(%connection, scope, "pre-auth rate limit rejection");
            return Decision::Rejected {
                scope,
                retry_after_seconds: wait.as_secs().max(1),
            };
        }

        if let Some(window) = inner.connection_windows.get_mut(&connection) {
            window.record(now);
        }
        inner.global.record(now);
        Decision::Allowed
    }

    /// Drop per-connection state when a connection closes.
    pub fn forget_connection(&self, connection: ConnectionId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.connection_windows.remove(&connection);
        }
    }

    /// Drop per-key state on revocation.
    pub fn forget_key(&self, key: &KeyId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.key_buckets.remove(key);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterSettings {
            global_per_minute: 100,
            connection_per_minute: 50,
        })
    }

    const LIMITS: KeyLimits = KeyLimits {
        rate_per_minute: 60,
        burst: 3,
    };

    #[test]
    fn test_burst_then_key_rejection() {
        let limiter = limiter();
        let key = KeyId::new("k1");
        let conn = ConnectionId(1);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        }
        match limiter.allow_at(&key, LIMITS, conn, now) {
            Decision::Rejected {
                scope,
                retry_after_seconds,
            } => {
                assert_eq!(scope, "key");
                assert!(retry_after_seconds >= 1);
            },
            Decision::Allowed => panic!("fourth burst call must be rejected"),
        }
    }

    #[test]
    fn test_refill_readmits_after_one_second() {
        let limiter = limiter();
        let key = KeyId::new("k1");
        let conn = ConnectionId(1);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        }
        assert!(!limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        let later = now + Duration::from_millis(1100);
        assert!(limiter.allow_at(&key, LIMITS, conn, later).is_allowed());
    }

    #[test]
    fn test_rejection_charges_nothing() {
        let limiter = RateLimiter::new(RateLimiterSettings {
            global_per_minute: 100,
            connection_per_minute: 2,
        });
        let key = KeyId::new("k1");
        let conn = ConnectionId(1);
        let now = Instant::now();

        assert!(limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        assert!(limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        // Connection window is full; the key bucket still has one token,
        // which the rejection must not consume.
        assert!(!limiter.allow_at(&key, LIMITS, conn, now).is_allowed());
        let other_conn = ConnectionId(2);
        assert!(limiter.allow_at(&key, LIMITS, other_conn, now).is_allowed());
    }

    #[test]
    fn test_global_window_applies_across_keys() {
        let limiter = RateLimiter::new(RateLimiterSettings {
            global_per_minute: 2,
            connection_per_minute: 50,
        });
        let now = Instant::now();
        assert!(
            limiter
                .allow_at(&KeyId::new("a"), LIMITS, ConnectionId(1), now)
                .is_allowed()
        );
        assert!(
            limiter
                .allow_at(&KeyId::new("b"), LIMITS, ConnectionId(2), now)
                .is_allowed()
        );
        match limiter.allow_at(&KeyId::new("c"), LIMITS, ConnectionId(3), now) {
            Decision::Rejected { scope, .. } => assert_eq!(scope, "global"),
            Decision::Allowed => panic!("global window must reject"),
        }
    }

    #[test]
    fn test_unkeyed_admission_hits_connection_window() {
        let limiter = RateLimiter::new(RateLimiterSettings {
            global_per_minute: 100,
            connection_per_minute: 3,
        });
        let conn = ConnectionId(1);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_unkeyed_at(conn, now).is_allowed());
        }
        match limiter.allow_unkeyed_at(conn, now) {
            Decision::Rejected { scope, .. } => assert_eq!(scope, "connection"),
            Decision::Allowed => panic!("fourth pre-auth attempt must be rejected"),
        }
        // A different connection still gets through.
        assert!(limiter.allow_unkeyed_at(ConnectionId(2), now).is_allowed());
    }

    #[test]
    fn test_unkeyed_and_keyed_share_the_windows() {
        let limiter = RateLimiter::new(RateLimiterSettings {
            global_per_minute: 100,
            connection_per_minute: 3,
        });
        let conn = ConnectionId(1);
        let now = Instant::now();

        // Two pre-auth attempts plus one keyed call fill the window.
        assert!(limiter.allow_unkeyed_at(conn, now).is_allowed());
        assert!(limiter.allow_unkeyed_at(conn, now).is_allowed());
        assert!(limiter.allow_at(&KeyId::new("k1"), LIMITS, conn, now).is_allowed());
        assert!(!limiter.allow_unkeyed_at(conn, now).is_allowed());
    }

    #[test]
    fn test_admissions_bounded_by_rate_plus_burst() {
        // Invariant: admitted requests in any 60s window never exceed
        // rate + burst for the key.
        let limiter = RateLimiter::new(RateLimiterSettings {
            global_per_minute: 10_000,
            connection_per_minute: 10_000,
        });
        let key = KeyId::new("k1");
        let conn = ConnectionId(1);
        let start = Instant::now();

        let mut admitted = 0u32;
        // One attempt every 100ms for 60 seconds of virtual time.
        for tick in 0..600u64 {
            let now = start + Duration::from_millis(tick * 100);
            if limiter.allow_at(&key, LIMITS, conn, now).is_allowed() {
                admitted += 1;
            }
        }
        assert!(admitted <= LIMITS.rate_per_minute + LIMITS.burst);
    }
}
