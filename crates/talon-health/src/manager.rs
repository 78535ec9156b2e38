//! The feature manager and probe scheduler.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use talon_backends::HealthStatus;
use talon_config::HealthConfig;

use crate::features::{FEATURES, FeatureSpec};

/// A named backend probe. The server wraps each adapter's `health()` in
/// one of these.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Backend health name (`"elasticsearch"`, ...).
    fn name(&self) -> &str;

    /// Run one probe.
    async fn probe(&self) -> HealthStatus;
}

/// Latest probe result for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// Probe outcome.
    pub status: HealthStatus,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// Full health view for the status tool and `talon://health` resource.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HealthSnapshot {
    /// Backend probe results keyed by health name.
    pub backends: HashMap<String, BackendHealth>,
    /// Feature availability keyed by feature id.
    pub features: HashMap<String, bool>,
}

/// Probes backends and computes feature availability.
pub struct FeatureManager {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
    probe_interval: Duration,
    state: RwLock<HealthSnapshot>,
}

impl FeatureManager {
    /// Create a manager with no probes registered yet. Until the first
    /// probe round, every feature is unavailable.
    #[must_use]
    pub fn new(config: &HealthConfig) -> Self {
        let mut snapshot = HealthSnapshot::default();
        for feature in FEATURES {
            snapshot.features.insert(feature.id.to_owned(), false);
        }
        Self {
            probes: Vec::new(),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
            state: RwLock::new(snapshot),
        }
    }

    /// Register a backend probe.
    pub fn add_probe(&mut self, probe: Arc<dyn HealthProbe>) {
        self.probes.push(probe);
    }

    /// Whether a feature is currently available.
    #[must_use]
    pub fn is_available(&self, feature: &str) -> bool {
        self.state
            .read()
            .ok()
            .and_then(|s| s.features.get(feature).copied())
            .unwrap_or(false)
    }

    /// The backend that makes a feature unavailable right now, for error
    /// payloads (`data.service`). Falls back to the first dependency.
    #[must_use]
    pub fn blocking_service(&self, feature: &str) -> String {
        let spec = FEATURES.iter().find(|f| f.id == feature);
        let Some(spec) = spec else {
            return "unknown".to_owned();
        };
        if let Ok(state) = self.state.read() {
            for dependency in spec.dependencies {
                let healthy = state
                    .backends
                    .get(*dependency)
                    .is_some_and(|b| b.status.ok);
                if !healthy {
                    return (*dependency).to_owned();
                }
            }
        }
        spec.dependencies.first().map_or_else(
            || "unknown".to_owned(),
            |first| (*first).to_owned(),
        )
    }

    /// Copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Run one probe round and recompute feature availability.
    ///
    /// A probe that exceeds the hard timeout is recorded unhealthy; the
    /// round never blocks on a hung backend.
    pub async fn run_probes_once(&self) {
        let mut results: HashMap<String, BackendHealth> = HashMap::new();
        for probe in &self.probes {
            let name = probe.name().to_owned();
            let status = match tokio::time::timeout(self.probe_timeout, probe.probe()).await {
                Ok(status) => status,
                Err(_) => HealthStatus::unhealthy(format!(
                    "probe exceeded {}s timeout",
                    self.probe_timeout.as_secs()
                )),
            };
            results.insert(
                name,
                BackendHealth {
                    status,
                    checked_at: Utc::now(),
                },
            );
        }

        let Ok(mut state) = self.state.write() else {
            return;
        };
        state.backends = results;
        for feature in FEATURES {
            let available = feature_available(feature, &state.backends);
            let previous = state.features.insert(feature.id.to_owned(), available);
            if previous != Some(available) {
                if available {
                    tracing::info!(feature = feature.id, "feature became available");
                } else {
                    tracing::warn!(feature = feature.id, "feature became unavailable");
                }
            }
        }
    }

    /// Spawn the periodic probe loop. Runs one round immediately, then on
    /// the configured interval, until the token is cancelled.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.run_probes_once().await;
                    },
                }
            }
        })
    }
}

fn feature_available(feature: &FeatureSpec, backends: &HashMap<String, BackendHealth>) -> bool {
    feature
        .dependencies
        .iter()
        .all(|dep| backends.get(*dep).is_some_and(|b| b.status.ok))
}

impl std::fmt::Debug for FeatureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureManager")
            .field("probes", &self.probes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StaticProbe {
        name: &'static str,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        fn name(&self) -> &str {
            self.name
        }
        async fn probe(&self) -> HealthStatus {
            if self.healthy.load(Ordering::SeqCst) {
                HealthStatus::healthy("ok")
            } else {
                HealthStatus::unhealthy("down")
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        fn name(&self) -> &str {
            "elasticsearch"
        }
        async fn probe(&self) -> HealthStatus {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            HealthStatus::healthy("never")
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            probe_interval_seconds: 30,
            probe_timeout_seconds: 1,
        }
    }

    #[tokio::test]
    async fn test_features_unavailable_before_first_probe() {
        let manager = FeatureManager::new(&config());
        assert!(!manager.is_available("elasticsearch_queries"));
        assert!(!manager.is_available("no_such_feature"));
    }

    #[tokio::test]
    async fn test_availability_follows_dependency_health() {
        let probe = Arc::new(StaticProbe {
            name: "elasticsearch",
            healthy: AtomicBool::new(true),
        });
        let mut manager = FeatureManager::new(&config());
        manager.add_probe(probe.clone());

        manager.run_probes_once().await;
        assert!(manager.is_available("elasticsearch_queries"));
        assert!(manager.is_available("campaign_analysis"));
        // threat_intel has no probe registered, so enrichment stays off.
        assert!(!manager.is_available("threat_enrichment"));

        probe.healthy.store(false, Ordering::SeqCst);
        manager.run_probes_once().await;
        assert!(!manager.is_available("elasticsearch_queries"));
        assert_eq!(manager.blocking_service("elasticsearch_queries"), "elasticsearch");
    }

    #[tokio::test]
    async fn test_hung_probe_is_unhealthy_not_blocking() {
        let mut manager = FeatureManager::new(&config());
        manager.add_probe(Arc::new(HangingProbe));
        manager.run_probes_once().await;
        let snapshot = manager.snapshot();
        let backend = &snapshot.backends["elasticsearch"];
        assert!(!backend.status.ok);
        assert!(backend.status.detail.contains("timeout"));
    }
}
