//! Threat-intelligence HTTP client.
//!
//! Wraps the vendor's reputation API. Two local concerns the vendor
//! contract forces on us:
//!
//! - The vendor's own rate limit, enforced with an internal token bucket
//!   that is separate from the user-facing rate limiter.
//! - A TTL response cache, so repeated lookups of the same indicator inside
//!   the window never leave the process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use talon_config::ThreatIntelConfig;
use talon_core::RequestCtx;
use talon_ratelimit::TokenBucket;

use crate::error::{BackendError, BackendResult};
use crate::health::HealthStatus;
use crate::traits::{Reputation, ReputationService};

/// The reqwest-backed threat-intel adapter.
pub struct ThreatIntelClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Reputation)>>,
    vendor_bucket: Mutex<TokenBucket>,
}

impl ThreatIntelClient {
    /// Build the client from config.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: &ThreatIntelConfig) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            cache_ttl: Duration::from_secs(config.cache_ttl_seconds),
            cache: Mutex::new(HashMap::new()),
            vendor_bucket: Mutex::new(TokenBucket::new(
                config.rate_limit_per_minute,
                config.rate_limit_per_minute.max(1),
                Instant::now(),
            )),
        })
    }

    /// Whether the vendor is configured at all. An unresolved `vault://`
    /// api key counts as unconfigured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty()
            && !self.api_key.is_empty()
            && !self.api_key.starts_with("vault://")
    }

    fn cached(&self, ip: &str) -> Option<Reputation> {
        let cache = self.cache.lock().ok()?;
        let (stored_at, reputation) = cache.get(ip)?;
        (stored_at.elapsed() < self.cache_ttl).then(|| reputation.clone())
    }

    fn store(&self, ip: &str, reputation: &Reputation) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(ip.to_owned(), (Instant::now(), reputation.clone()));
        }
    }

    /// Take one vendor token or fail with the refill hint.
    fn take_vendor_token(&self) -> BackendResult<()> {
        let Ok(mut bucket) = self.vendor_bucket.lock() else {
            return Ok(());
        };
        match bucket.check(Instant::now()) {
            Ok(()) => {
                bucket.consume();
                Ok(())
            },
            Err(wait) => Err(BackendError::VendorRateLimited {
                retry_after_seconds: wait.as_secs().max(1),
            }),
        }
    }

    async fn fetch(&self, ctx: &RequestCtx, ip: &str) -> BackendResult<Reputation> {
        self.take_vendor_token()?;
        let request = self
            .http
            .get(format!("{}/reputation/{ip}", self.api_url))
            .bearer_auth(&self.api_key);

        let fut = async {
            let response = request
                .send()
                .await
                .map_err(|e| BackendError::Connection(e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(BackendError::NotFound(ip.to_owned()));
            }
            if !status.is_success() {
                return Err(BackendError::Status {
                    code: status.as_u16(),
                    detail: "vendor error".to_owned(),
                });
            }
            let body: Value = response
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            Ok(decode_reputation(ip, &body))
        };

        tokio::select! {
            () = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
            result = fut => result,
        }
    }
}

fn decode_reputation(ip: &str, body: &Value) -> Reputation {
    Reputation {
        indicator: ip.to_owned(),
        score: u8::try_from(body.get("score").and_then(Value::as_u64).unwrap_or(0).min(100))
            .unwrap_or(100),
        categories: body
            .get("categories")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        last_seen: body
            .get("last_seen")
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}

#[async_trait]
impl ReputationService for ThreatIntelClient {
    async fn reputation(&self, ctx: &RequestCtx, ip: &str) -> BackendResult<Reputation> {
        if let Some(cached) = self.cached(ip) {
            return Ok(cached);
        }
        let reputation = self.fetch(ctx, ip).await?;
        self.store(ip, &reputation);
        Ok(reputation)
    }

    async fn batch_reputation(
        &self,
        ctx: &RequestCtx,
        ips: &[String],
    ) -> BackendResult<Vec<Reputation>> {
        let mut results = Vec::with_capacity(ips.len());
        for ip in ips {
            if ctx.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            match self.reputation(ctx, ip).await {
                Ok(reputation) => results.push(reputation),
                // Unknown indicators drop out of the batch.
                Err(BackendError::NotFound(_)) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    async fn health(&self) -> HealthStatus {
        if !self.is_configured() {
            return HealthStatus::unhealthy("threat intel vendor not configured");
        }
        let request = self
            .http
            .get(format!("{}/ping", self.api_url))
            .bearer_auth(&self.api_key);
        match request.send().await {
            Ok(response) if response.status().is_success() => HealthStatus::healthy("vendor ok"),
            Ok(response) => {
                HealthStatus::unhealthy(format!("vendor status {}", response.status().as_u16()))
            },
            Err(e) if e.is_connect() => HealthStatus::unhealthy("vendor unreachable"),
            Err(e) => HealthStatus::unhealthy(format!("vendor probe failed: {e}")),
        }
    }
}

impl std::fmt::Debug for ThreatIntelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatIntelClient")
            .field("api_url", &self.api_url)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ThreatIntelConfig {
        ThreatIntelConfig {
            api_url: "https://intel.example".to_owned(),
            api_key: "key".to_owned(),
            cache_ttl_seconds: 3600,
            rate_limit_per_minute: 2,
        }
    }

    #[test]
    fn test_unconfigured_detection() {
        let mut unconfigured = config();
        unconfigured.api_key = "vault://intel/key".to_owned();
        let client = ThreatIntelClient::new(&unconfigured).unwrap();
        assert!(!client.is_configured());
        assert!(ThreatIntelClient::new(&config()).unwrap().is_configured());
    }

    #[test]
    fn test_decode_reputation() {
        let body = json!({
            "score": 87,
            "categories": ["scanner", "bruteforce"],
            "last_seen": "2026-07-29T10:00:00Z"
        });
        let reputation = decode_reputation("141.98.80.121", &body);
        assert_eq!(reputation.score, 87);
        assert_eq!(reputation.categories, vec!["scanner", "bruteforce"]);
    }

    #[test]
    fn test_cache_hit_skips_vendor() {
        let client = ThreatIntelClient::new(&config()).unwrap();
        let reputation = Reputation {
            indicator: "141.98.80.121".to_owned(),
            score: 90,
            categories: vec!["scanner".to_owned()],
            last_seen: None,
        };
        client.store("141.98.80.121", &reputation);
        assert_eq!(client.cached("141.98.80.121").unwrap().score, 90);
        assert!(client.cached("198.51.100.1").is_none());
    }

    #[test]
    fn test_vendor_bucket_exhaustion() {
        let client = ThreatIntelClient::new(&config()).unwrap();
        assert!(client.take_vendor_token().is_ok());
        assert!(client.take_vendor_token().is_ok());
        let err = client.take_vendor_token().unwrap_err();
        assert!(matches!(err, BackendError::VendorRateLimited { .. }));
    }
}
