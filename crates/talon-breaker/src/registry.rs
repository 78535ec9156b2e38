//! Breaker registry keyed by backend service name.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerSettings, CircuitBreaker, CircuitState};

/// Status of one breaker, for the monitoring tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    /// Guarded service name.
    pub service: String,
    /// Current state.
    pub state: CircuitState,
    /// Matched failures since the last reset.
    pub failure_count: u32,
    /// Successes in the current half-open probe.
    pub success_count: u32,
}

/// Holds one breaker per backend service.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create a registry; every breaker shares the same settings.
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    /// Get (or lazily create) the breaker for a service.
    #[must_use]
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.settings)))
            .clone()
    }

    /// Snapshot every breaker's status, sorted by service name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<BreakerStatus> = self
            .breakers
            .iter()
            .map(|entry| {
                let (state, failure_count, success_count) = entry.value().counters();
                BreakerStatus {
                    service: entry.key().clone(),
                    state,
                    failure_count,
                    success_count,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("services", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_service_same_breaker() {
        let registry = BreakerRegistry::new(BreakerSettings::default());
        let a = registry.get("elasticsearch");
        let b = registry.get("elasticsearch");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let registry = BreakerRegistry::new(BreakerSettings::default());
        registry.get("threat_intel");
        registry.get("elasticsearch");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].service, "elasticsearch");
        assert_eq!(snapshot[1].service, "threat_intel");
        assert_eq!(snapshot[0].state, CircuitState::Closed);
    }
}
