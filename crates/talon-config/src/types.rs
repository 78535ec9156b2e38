//! The configuration tree.
//!
//! Mirrors the YAML layout key for key. Defaults live in `defaults.yaml`
//! (embedded at compile time), so every field can deserialize from the fully
//! merged tree without serde-level default attributes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use talon_core::PermissionSet;

/// Root configuration value, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Elasticsearch backend wiring.
    pub elasticsearch: ElasticsearchConfig,
    /// Threat-intelligence vendor wiring.
    pub threat_intel: ThreatIntelConfig,
    /// Query engine knobs.
    pub query: QueryConfig,
    /// Streaming engine knobs.
    pub streaming: StreamingConfig,
    /// Timeouts, retry, breaker, and error aggregation.
    pub error_handling: ErrorHandlingConfig,
    /// Transport selection and limits.
    pub transport: TransportConfig,
    /// Authentication defaults and key records.
    pub auth: AuthConfig,
    /// Health prober cadence.
    pub health: HealthConfig,
    /// Report renderer subprocess.
    pub report: ReportConfig,
    /// Vault CLI wiring.
    pub secrets: SecretsConfig,
    /// Server facade knobs.
    pub server: ServerConfig,
    /// Where rendered reports are written.
    pub output_directory: String,
}

/// Elasticsearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `https://siem.example.org:9200`.
    pub url: String,
    /// Basic-auth username (empty = no auth).
    pub username: String,
    /// Basic-auth password; may be a `vault://` reference.
    pub password: String,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    /// Send ES 8.x compatibility headers.
    pub compatibility_mode: bool,
    /// Index patterns keyed by source name (`cowrie`, `zeek`, ...).
    pub indices: BTreeMap<String, String>,
}

impl ElasticsearchConfig {
    /// All configured index patterns, comma-joined for search requests.
    #[must_use]
    pub fn index_pattern(&self) -> String {
        self.indices
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Threat-intelligence vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntelConfig {
    /// Vendor base URL (empty disables the feature).
    pub api_url: String,
    /// Vendor api key; may be a `vault://` reference (optional secret).
    pub api_key: String,
    /// Response cache TTL.
    pub cache_ttl_seconds: u64,
    /// Vendor-side request budget, enforced by the adapter.
    pub rate_limit_per_minute: u32,
}

/// Fallback when a result exceeds the size budget after optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// Substitute an aggregation query returning summaries only.
    Aggregate,
    /// Random sample within the range.
    Sample,
    /// Fail with an oversized-result error.
    Error,
}

/// Query engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size when the caller does not specify one.
    pub default_page_size: usize,
    /// Hard cap on requested page size.
    pub max_page_size: usize,
    /// Result-size budget in MiB for the smart optimizer.
    pub max_result_size_mb: u64,
    /// Per-query backend deadline.
    pub query_timeout_seconds: u64,
    /// What to do when optimization cannot fit the budget.
    pub fallback_strategy: FallbackStrategy,
}

impl QueryConfig {
    /// The size budget in bytes.
    #[must_use]
    pub const fn max_result_size_bytes(&self) -> u64 {
        self.max_result_size_mb * 1024 * 1024
    }
}

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Events per chunk when the caller does not specify.
    pub default_chunk_size: usize,
    /// Chunks per call before a resume cursor is returned.
    pub max_chunks: usize,
    /// Gap that splits two events into separate sessions.
    pub session_gap_seconds: u64,
}

/// Timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Default per-tool deadline.
    pub tool_default_seconds: u64,
    /// Per-backend-call deadline.
    pub backend_seconds: u64,
}

/// Retry settings for idempotent backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// First backoff delay.
    pub initial_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_seconds: u64,
}

/// Circuit breaker settings (shared by all backends).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Matched failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before a half-open probe.
    pub recovery_timeout: u64,
    /// Successes in half-open before closing.
    pub success_threshold: u32,
}

/// Error aggregation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAggregationConfig {
    /// Sliding window for reports.
    pub window_seconds: u64,
    /// Ring buffer capacity.
    pub history_size: usize,
}

/// Error handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Deadlines.
    pub timeouts: TimeoutsConfig,
    /// Retry policy.
    pub retry: RetryPolicyConfig,
    /// Breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Analytics bounds.
    pub error_aggregation: ErrorAggregationConfig,
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Single connection over the process's standard streams.
    Stdio,
    /// Many connections over a TCP listener.
    Tcp,
}

/// TCP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Bind address.
    pub bind: String,
    /// Listen port.
    pub port: u16,
    /// Accept cap.
    pub max_connections: usize,
    /// Kept for config compatibility; the effective idle timeout is
    /// `transport.idle_timeout_seconds`.
    pub connection_timeout_seconds: u64,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to run.
    pub mode: TransportMode,
    /// Maximum frame size in bytes.
    pub max_frame_bytes: usize,
    /// In-flight request cap per connection.
    pub max_in_flight_per_connection: usize,
    /// Idle connection expiry.
    pub idle_timeout_seconds: u64,
    /// TCP-specific settings.
    pub tcp: TcpConfig,
}

/// Defaults applied to keys that do not specify their own values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthDefaultsConfig {
    /// Key lifetime at issuance.
    pub expiration_days: u32,
    /// Per-key request rate.
    pub rate_limit_per_minute: u32,
    /// Token bucket burst.
    pub burst: u32,
    /// Default permission grant.
    pub permissions: PermissionSet,
}

/// One stored api-key record. Only the salted hash is ever configured;
/// plaintext keys never appear in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Opaque key id.
    pub id: String,
    /// Base64 salt.
    pub salt: String,
    /// Hex SHA-256 of salt || secret; may be a `vault://` reference.
    pub hash: String,
    /// RFC 3339 expiry (absent = no expiry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Per-key rate override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
    /// Permission override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Issuance defaults.
    pub defaults: AuthDefaultsConfig,
    /// Server-wide sliding-window cap across all keys.
    pub global_rate_limit_per_minute: u32,
    /// Sliding-window cap per connection.
    pub connection_rate_limit_per_minute: u32,
    /// Stored key records.
    pub keys: Vec<ApiKeyConfig>,
}

/// Health prober settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between probe rounds.
    pub probe_interval_seconds: u64,
    /// Hard per-probe deadline.
    pub probe_timeout_seconds: u64,
}

/// Report renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Typesetter binary name or path.
    pub typesetter_binary: String,
    /// Wall-clock cap per render.
    pub timeout_seconds: u64,
    /// Output size cap in MiB.
    pub max_output_mb: u64,
}

/// Vault CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Binary invoked as `<vault_command> get <path>`.
    pub vault_command: String,
}

/// Server facade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Graceful shutdown drain deadline.
    pub shutdown_deadline_seconds: u64,
}
