//! The `tools/call` dispatcher.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use talon_core::{PermissionSet, RequestCtx, ServerError, ServerResult};
use talon_health::FeatureManager;

use crate::registry::ToolRegistry;
use crate::schema::validate_args;

/// Orchestrates one tool call: resolve → permission → features → schema →
/// cancellable timeout → invoke. Holds no tool state.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    features: Arc<FeatureManager>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, features: Arc<FeatureManager>) -> Self {
        Self { registry, features }
    }

    /// The registry (for `tools/list`).
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one call on behalf of a session with the given permissions.
    ///
    /// # Errors
    ///
    /// Every gate failure and handler failure comes back as a typed
    /// [`ServerError`]; the caller serializes it to the wire.
    pub async fn dispatch(
        &self,
        ctx: &RequestCtx,
        permissions: PermissionSet,
        tool_name: &str,
        args: Value,
    ) -> ServerResult<Value> {
        // 1. Resolve.
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ServerError::MethodNotFound {
                method: tool_name.to_owned(),
            })?;

        // 2. Permission.
        if !permissions.allows(tool.definition.required_permission) {
            return Err(ServerError::AccessDenied {
                permission: tool.definition.required_permission.to_string(),
            });
        }

        // 3. Feature availability.
        for feature in &tool.definition.required_features {
            if !self.features.is_available(feature) {
                return Err(ServerError::FeatureUnavailable {
                    feature: feature.clone(),
                    service: self.features.blocking_service(feature),
                });
            }
        }

        // 4. Schema validation.
        validate_args(&tool.schema, &args)?;

        // 5–6. Cancellable timeout scope around the handler.
        let timeout = tool.definition.timeout;
        let child_ctx = RequestCtx {
            correlation_id: ctx.correlation_id,
            session_id: ctx.session_id,
            cancel: ctx.cancel.child_token(),
        };
        let started = Instant::now();
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => Err(ServerError::Internal("request cancelled".to_owned())),
            outcome = tokio::time::timeout(timeout, tool.handler.call(&child_ctx, args)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => {
                        // Stop whatever the handler still has in flight.
                        child_ctx.cancel.cancel();
                        Err(ServerError::Timeout {
                            timeout_seconds: timeout.as_secs(),
                        })
                    },
                }
            },
        };

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => {
                tracing::debug!(tool = tool_name, elapsed_ms, "tool call succeeded");
            },
            Err(e) => {
                tracing::debug!(tool = tool_name, elapsed_ms, code = %e.code(), "tool call failed");
            },
        }
        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ToolDefinition, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use talon_config::HealthConfig;
    use talon_core::{Permission, ToolCategory};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, _ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
            Ok(json!({ "echo": args }))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ToolHandler for SlowHandler {
        async fn call(&self, ctx: &RequestCtx, _args: Value) -> ServerResult<Value> {
            tokio::select! {
                () = ctx.cancel.cancelled() => Err(ServerError::Internal("cancelled".into())),
                () = tokio::time::sleep(Duration::from_secs(3600)) => Ok(Value::Null),
            }
        }
    }

    fn features() -> Arc<FeatureManager> {
        Arc::new(FeatureManager::new(&HealthConfig {
            probe_interval_seconds: 30,
            probe_timeout_seconds: 5,
        }))
    }

    fn dispatcher_with(tools: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        for (definition, handler) in tools {
            registry.register(definition, handler).unwrap();
        }
        Dispatcher::new(Arc::new(registry), features())
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dispatcher = dispatcher_with(vec![]);
        let err = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "nope",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), -32601);
    }

    #[tokio::test]
    async fn test_permission_gate() {
        let dispatcher = dispatcher_with(vec![(
            ToolDefinition::new("admin_tool", ToolCategory::Monitoring)
                .requires_permission(Permission::Admin),
            Arc::new(EchoHandler),
        )]);
        let err = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "admin_tool",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), -32002);
    }

    #[tokio::test]
    async fn test_feature_gate_names_service() {
        let dispatcher = dispatcher_with(vec![(
            ToolDefinition::new("query_dshield_events", ToolCategory::Query)
                .requires_feature("elasticsearch_queries"),
            Arc::new(EchoHandler),
        )]);
        let err = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "query_dshield_events",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), -32003);
        assert_eq!(err.data()["service"], "elasticsearch");
    }

    #[tokio::test]
    async fn test_schema_gate() {
        let dispatcher = dispatcher_with(vec![(
            ToolDefinition::new("strict", ToolCategory::Utility).with_schema(json!({
                "type": "object",
                "required": ["needed"],
            })),
            Arc::new(EchoHandler),
        )]);
        let err = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "strict",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), -32004);
    }

    #[tokio::test]
    async fn test_timeout_carries_seconds() {
        let dispatcher = dispatcher_with(vec![(
            ToolDefinition::new("slow", ToolCategory::Query)
                .with_timeout(Duration::from_millis(50)),
            Arc::new(SlowHandler),
        )]);
        let err = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "slow",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), -32005);
        assert!(err.data()["timeout_seconds"].is_u64());
    }

    #[tokio::test]
    async fn test_happy_path() {
        let dispatcher = dispatcher_with(vec![(
            ToolDefinition::new("echo", ToolCategory::Utility),
            Arc::new(EchoHandler),
        )]);
        let result = dispatcher
            .dispatch(
                &RequestCtx::detached(),
                PermissionSet::read_only(),
                "echo",
                json!({ "x": 1 }),
            )
            .await
            .unwrap();
        assert_eq!(result["echo"]["x"], 1);
    }
}
