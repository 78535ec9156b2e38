//! Tool definitions and the handler trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use talon_core::{Permission, RequestCtx, ServerResult, ToolCategory};

/// Default per-tool timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A tool's behavior. Implementations live next to their subsystem (query
/// engine, correlator, monitoring) and must propagate `ctx.cancel` into
/// every backend call they make.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-validated arguments.
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value>;
}

/// Static description of one tool, published via `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Category shown to clients.
    pub category: ToolCategory,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
    /// Feature ids that must all be available.
    pub required_features: Vec<String>,
    /// Permission the session must hold.
    pub required_permission: Permission,
    /// Per-tool deadline.
    #[serde(with = "timeout_seconds")]
    pub timeout: Duration,
}

impl ToolDefinition {
    /// Create a definition with the default timeout and no feature
    /// requirements.
    #[must_use]
    pub fn new(name: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            category,
            description: String::new(),
            input_schema: serde_json::json!({ "type": "object" }),
            required_features: Vec::new(),
            required_permission: Permission::ReadTools,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Require a feature.
    #[must_use]
    pub fn requires_feature(mut self, feature: impl Into<String>) -> Self {
        self.required_features.push(feature.into());
        self
    }

    /// Require a permission other than the default `read_tools`.
    #[must_use]
    pub fn requires_permission(mut self, permission: Permission) -> Self {
        self.required_permission = permission;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serialize the timeout as whole seconds, the form `tools/list` publishes.
mod timeout_seconds {
    use super::Duration;
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(
        timeout: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(timeout.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let tool = ToolDefinition::new("query_dshield_events", ToolCategory::Query);
        assert_eq!(tool.timeout, Duration::from_secs(120));
        assert_eq!(tool.required_permission, Permission::ReadTools);
        assert!(tool.required_features.is_empty());
    }

    #[test]
    fn test_serialized_timeout_is_seconds() {
        let tool = ToolDefinition::new("t", ToolCategory::Utility)
            .with_timeout(Duration::from_secs(30));
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["timeout"], 30);
    }
}
