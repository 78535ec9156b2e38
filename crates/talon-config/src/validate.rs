//! Post-merge validation.
//!
//! Runs after env overrides and secret resolution, on the typed config.
//! Catches the misconfigurations that would otherwise surface as confusing
//! runtime failures.

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate the merged configuration.
///
/// # Errors
///
/// Returns a [`ConfigError::Validation`] describing the first problem found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    if config.elasticsearch.url.is_empty() {
        return fail("elasticsearch.url must not be empty");
    }
    if Url::parse(&config.elasticsearch.url).is_err() {
        return fail("elasticsearch.url is not a valid URL");
    }
    if !config.threat_intel.api_url.is_empty() && Url::parse(&config.threat_intel.api_url).is_err()
    {
        return fail("threat_intel.api_url is not a valid URL");
    }
    if config.elasticsearch.indices.is_empty() {
        return fail("elasticsearch.indices must define at least one index pattern");
    }

    if config.query.default_page_size == 0 {
        return fail("query.default_page_size must be positive");
    }
    if config.query.default_page_size > config.query.max_page_size {
        return fail("query.default_page_size exceeds query.max_page_size");
    }
    if config.query.max_result_size_mb == 0 {
        return fail("query.max_result_size_mb must be positive");
    }

    if config.streaming.default_chunk_size == 0 || config.streaming.max_chunks == 0 {
        return fail("streaming chunk settings must be positive");
    }

    let breaker = &config.error_handling.circuit_breaker;
    if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
        return fail("circuit_breaker thresholds must be positive");
    }
    if config.error_handling.retry.max_attempts == 0 {
        return fail("retry.max_attempts must be at least 1");
    }
    if config.error_handling.error_aggregation.history_size == 0 {
        return fail("error_aggregation.history_size must be positive");
    }

    if config.transport.max_frame_bytes == 0 {
        return fail("transport.max_frame_bytes must be positive");
    }
    if config.transport.max_in_flight_per_connection == 0 {
        return fail("transport.max_in_flight_per_connection must be positive");
    }

    if config.auth.global_rate_limit_per_minute == 0 {
        return fail("auth.global_rate_limit_per_minute must be positive");
    }
    for key in &config.auth.keys {
        if key.id.is_empty() {
            return fail("auth.keys entries must have a non-empty id");
        }
        if key.hash.len() != 64 || !key.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ConfigError::Validation(format!(
                "auth key '{}' hash must be 64 hex characters (sha-256)",
                key.id
            )));
        }
        if let Some(expires_at) = &key.expires_at {
            if chrono::DateTime::parse_from_rfc3339(expires_at).is_err() {
                return Err(ConfigError::Validation(format!(
                    "auth key '{}' expires_at is not RFC 3339",
                    key.id
                )));
            }
        }
    }

    if config.health.probe_timeout_seconds == 0
        || config.health.probe_timeout_seconds >= config.health.probe_interval_seconds
    {
        return fail("health.probe_timeout_seconds must be positive and below the probe interval");
    }

    Ok(())
}

fn fail(message: &str) -> ConfigResult<()> {
    Err(ConfigError::Validation(message.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        serde_yaml::from_str(include_str!("defaults.yaml")).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        validate(&defaults()).unwrap();
    }

    #[test]
    fn test_bad_es_url_rejected() {
        let mut config = defaults();
        config.elasticsearch.url = "not a url".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_page_size_ordering_enforced() {
        let mut config = defaults();
        config.query.default_page_size = 5000;
        config.query.max_page_size = 1000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_short_key_hash_rejected() {
        let mut config = defaults();
        config.auth.keys.push(crate::types::ApiKeyConfig {
            id: "k1".to_owned(),
            salt: "c2FsdA==".to_owned(),
            hash: "deadbeef".to_owned(),
            expires_at: None,
            rate_limit_per_minute: None,
            permissions: None,
        });
        assert!(validate(&config).is_err());
    }
}
