//! Error taxonomy with stable JSON-RPC error codes.
//!
//! Every failure anywhere in the server is translated into a [`ServerError`]
//! at its first catch point. The server facade is the single place that
//! serializes a [`ServerError`] into a JSON-RPC error response; nothing else
//! touches the wire representation. Messages never carry secrets or stack
//! traces; structured detail goes into the `data` payload instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable JSON-RPC error codes.
///
/// The `-32000..-32007` range is the server-defined extension space; the
/// `-327xx`/`-326xx` codes are the JSON-RPC 2.0 standard set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// JSON framing broken (-32700).
    ParseError,
    /// Well-formed JSON but not a valid JSON-RPC request (-32600).
    InvalidRequest,
    /// Unknown method or tool (-32601).
    MethodNotFound,
    /// Malformed params structure (-32602).
    InvalidParams,
    /// Uncategorized server bug (-32603).
    InternalError,
    /// A backend raised a matched failure (-32000).
    ExternalServiceError,
    /// Authentication required, or resource not found (-32001);
    /// disambiguated by `data.kind`.
    AuthRequired,
    /// Missing permission (-32002).
    AccessDenied,
    /// A required feature is not healthy (-32003).
    FeatureUnavailable,
    /// Input validation failure with per-field detail (-32004).
    ValidationError,
    /// Tool or backend deadline exceeded (-32005).
    TimeoutError,
    /// Per-key or global rate limit hit (-32006).
    RateLimitExceeded,
    /// Circuit breaker open for a required backend (-32007).
    CircuitBreakerOpen,
}

impl ErrorCode {
    /// The wire-level integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ExternalServiceError => -32000,
            Self::AuthRequired => -32001,
            Self::AccessDenied => -32002,
            Self::FeatureUnavailable => -32003,
            Self::ValidationError => -32004,
            Self::TimeoutError => -32005,
            Self::RateLimitExceeded => -32006,
            Self::CircuitBreakerOpen => -32007,
        }
    }

    /// Stable name used in logs and analytics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ExternalServiceError => "EXTERNAL_SERVICE_ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::FeatureUnavailable => "FEATURE_UNAVAILABLE",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// JSON pointer-ish path of the offending field.
    pub field: String,
    /// What was wrong with it.
    pub message: String,
    /// Canonical name to use instead, when the failure is a bad field name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl FieldError {
    /// Create a field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attach a canonical-name suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The server-wide error value.
///
/// Each variant carries exactly the structured detail its `data` payload
/// needs. Variants map onto [`ErrorCode`] via [`ServerError::code`].
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// JSON framing could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Parsed JSON is not a valid JSON-RPC 2.0 request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No such method or tool.
    #[error("method not found: {method}")]
    MethodNotFound {
        /// The method or tool name that was requested.
        method: String,
    },

    /// Input failed validation.
    #[error("validation failed: {}", summarize_fields(.fields))]
    Validation {
        /// Per-field failure detail.
        fields: Vec<FieldError>,
    },

    /// The caller is not authenticated (or the key is unusable).
    #[error("authentication required")]
    AuthRequired {
        /// Why: `missing`, `expired`, `invalid`, or `revoked`.
        kind: &'static str,
    },

    /// A named resource does not exist. Shares -32001 with `AuthRequired`;
    /// disambiguated by `data.kind = "not_found"`.
    #[error("resource not found: {resource}")]
    ResourceNotFound {
        /// The resource URI or identifier.
        resource: String,
    },

    /// The session lacks a required permission.
    #[error("access denied: requires {permission}")]
    AccessDenied {
        /// The missing permission.
        permission: String,
    },

    /// A tool's required feature is currently unavailable.
    #[error("feature unavailable: {feature}")]
    FeatureUnavailable {
        /// The unavailable feature id.
        feature: String,
        /// The unhealthy backend service behind it.
        service: String,
    },

    /// A deadline fired.
    #[error("operation timed out after {timeout_seconds}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds.
        timeout_seconds: u64,
    },

    /// A rate limiter rejected the request.
    #[error("rate limit exceeded ({scope})")]
    RateLimited {
        /// Which limiter rejected: `key`, `connection`, or `global`.
        scope: &'static str,
        /// Seconds until a retry may be admitted.
        retry_after_seconds: u64,
    },

    /// The breaker for a required backend is open.
    #[error("circuit breaker open for {service}")]
    CircuitOpen {
        /// The guarded backend service name.
        service: String,
        /// Seconds until the breaker may probe again.
        retry_after_seconds: u64,
    },

    /// A backend call failed with a matched (non-validation) error.
    #[error("external service error: {service}")]
    ExternalService {
        /// The failing backend service name.
        service: String,
        /// Sanitized failure detail.
        detail: String,
    },

    /// An estimated result exceeded the configured size budget and the
    /// fallback strategy is `error`.
    #[error("result too large: estimated {estimated_bytes} bytes (max {max_bytes})")]
    OversizedResult {
        /// Estimated response size in bytes.
        estimated_bytes: u64,
        /// Configured maximum in bytes.
        max_bytes: u64,
    },

    /// The session's key was revoked while the request was in flight.
    #[error("session revoked")]
    AuthRevoked,

    /// Anything else: a server bug.
    #[error("internal error: {0}")]
    Internal(String),
}

fn summarize_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ServerError {
    /// Convenience constructor for a single-field validation failure.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            fields: vec![FieldError::new(field, message)],
        }
    }

    /// The stable code this error maps onto.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            Self::Validation { .. } | Self::OversizedResult { .. } => ErrorCode::ValidationError,
            Self::AuthRequired { .. } | Self::ResourceNotFound { .. } | Self::AuthRevoked => {
                ErrorCode::AuthRequired
            },
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::FeatureUnavailable { .. } => ErrorCode::FeatureUnavailable,
            Self::Timeout { .. } => ErrorCode::TimeoutError,
            Self::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Self::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            Self::ExternalService { .. } => ErrorCode::ExternalServiceError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// The `data.kind` discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::Validation { .. } => "validation",
            Self::AuthRequired { kind } => *kind,
            Self::ResourceNotFound { .. } => "not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::FeatureUnavailable { .. } => "feature_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ExternalService { .. } => "external_service",
            Self::OversizedResult { .. } => "oversized_result",
            Self::AuthRevoked => "revoked",
            Self::Internal(_) => "internal",
        }
    }

    /// A human-readable next step for the caller.
    #[must_use]
    pub fn suggestion(&self) -> String {
        match self {
            Self::Parse(_) | Self::InvalidRequest(_) => {
                "check that the frame is a valid JSON-RPC 2.0 message".to_owned()
            },
            Self::MethodNotFound { .. } => {
                "list available tools with tools/list and check the name".to_owned()
            },
            Self::Validation { fields } => fields
                .iter()
                .find_map(|f| {
                    f.suggestion
                        .as_ref()
                        .map(|s| format!("use '{s}' instead of '{}'", f.field))
                })
                .unwrap_or_else(|| "fix the listed fields and retry".to_owned()),
            Self::AuthRequired { .. } | Self::AuthRevoked => {
                "authenticate with a valid api key".to_owned()
            },
            Self::ResourceNotFound { .. } => "list resources with resources/list".to_owned(),
            Self::AccessDenied { permission } => {
                format!("request a key with the '{permission}' permission")
            },
            Self::FeatureUnavailable { service, .. } => {
                format!("check {service} backend health and retry once it recovers")
            },
            Self::Timeout { .. } => "narrow the query or raise the tool timeout".to_owned(),
            Self::RateLimited {
                retry_after_seconds,
                ..
            }
            | Self::CircuitOpen {
                retry_after_seconds,
                ..
            } => {
                format!("retry after {retry_after_seconds}s")
            },
            Self::ExternalService { .. } => "the backend failed; retrying may help".to_owned(),
            Self::OversizedResult { .. } => {
                "narrow the time range, reduce fields, or use the streaming tool".to_owned()
            },
            Self::Internal(_) => "this is a server bug; report the correlation id".to_owned(),
        }
    }

    /// Build the structured `data` payload for the JSON-RPC error object.
    ///
    /// Always contains `kind` and `suggestion`; variant-specific keys are
    /// added on top.
    #[must_use]
    pub fn data(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("kind".to_owned(), Value::from(self.kind()));
        obj.insert("suggestion".to_owned(), Value::from(self.suggestion()));
        match self {
            Self::Validation { fields } => {
                obj.insert(
                    "fields".to_owned(),
                    serde_json::to_value(fields).unwrap_or(Value::Null),
                );
            },
            Self::FeatureUnavailable { feature, service } => {
                obj.insert("feature".to_owned(), Value::from(feature.as_str()));
                obj.insert("service".to_owned(), Value::from(service.as_str()));
            },
            Self::Timeout { timeout_seconds } => {
                obj.insert("timeout_seconds".to_owned(), Value::from(*timeout_seconds));
            },
            Self::RateLimited {
                scope,
                retry_after_seconds,
            } => {
                obj.insert("scope".to_owned(), Value::from(*scope));
                obj.insert(
                    "retry_after_seconds".to_owned(),
                    Value::from(*retry_after_seconds),
                );
            },
            Self::CircuitOpen {
                service,
                retry_after_seconds,
            } => {
                obj.insert("service".to_owned(), Value::from(service.as_str()));
                obj.insert(
                    "retry_after_seconds".to_owned(),
                    Value::from(*retry_after_seconds),
                );
            },
            Self::ExternalService { service, .. } => {
                obj.insert("service".to_owned(), Value::from(service.as_str()));
            },
            Self::OversizedResult {
                estimated_bytes,
                max_bytes,
            } => {
                obj.insert("estimated_bytes".to_owned(), Value::from(*estimated_bytes));
                obj.insert("max_bytes".to_owned(), Value::from(*max_bytes));
            },
            Self::ResourceNotFound { resource } => {
                obj.insert("resource".to_owned(), Value::from(resource.as_str()));
            },
            _ => {},
        }
        Value::Object(obj)
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
