//! Built-in monitoring and utility tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use talon_backends::ReportRenderer;
use talon_breaker::BreakerRegistry;
use talon_core::{ErrorAnalytics, RequestCtx, ServerError, ServerResult, ToolCategory};
use talon_health::FeatureManager;
use talon_query::QueryEngine;
use talon_tools::{ToolDefinition, ToolHandler};

use crate::metrics::MetricsState;

/// Handler for `get_health_status`.
pub struct HealthStatusTool {
    pub(crate) features: Arc<FeatureManager>,
    pub(crate) metrics: Arc<MetricsState>,
}

#[async_trait]
impl ToolHandler for HealthStatusTool {
    async fn call(&self, _ctx: &RequestCtx, _args: Value) -> ServerResult<Value> {
        let snapshot = self.features.snapshot();
        Ok(json!({
            "backends": snapshot.backends,
            "features": snapshot.features,
            "uptime_seconds": self.metrics.uptime_seconds(),
        }))
    }
}

impl HealthStatusTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("get_health_status", ToolCategory::Monitoring)
            .with_description("Backend health and feature availability snapshot")
    }
}

/// Handler for `get_error_analytics`.
pub struct ErrorAnalyticsTool(pub Arc<ErrorAnalytics>);

#[async_trait]
impl ToolHandler for ErrorAnalyticsTool {
    async fn call(&self, _ctx: &RequestCtx, _args: Value) -> ServerResult<Value> {
        serde_json::to_value(self.0.report())
            .map_err(|e| ServerError::Internal(format!("cannot serialize report: {e}")))
    }
}

impl ErrorAnalyticsTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("get_error_analytics", ToolCategory::Monitoring)
            .with_description("Error frequency, trend, and top offenders over the sliding window")
    }
}

/// Handler for `get_circuit_breaker_status`.
pub struct BreakerStatusTool(pub Arc<BreakerRegistry>);

#[async_trait]
impl ToolHandler for BreakerStatusTool {
    async fn call(&self, _ctx: &RequestCtx, _args: Value) -> ServerResult<Value> {
        Ok(json!({ "breakers": self.0.snapshot() }))
    }
}

impl BreakerStatusTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("get_circuit_breaker_status", ToolCategory::Monitoring)
            .with_description("Current state and counters of every circuit breaker")
    }
}

/// Handler for `get_data_dictionary`.
pub struct DataDictionaryTool(pub Arc<QueryEngine>);

#[async_trait]
impl ToolHandler for DataDictionaryTool {
    async fn call(&self, _ctx: &RequestCtx, _args: Value) -> ServerResult<Value> {
        Ok(self.0.data_dictionary())
    }
}

impl DataDictionaryTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("get_data_dictionary", ToolCategory::Utility)
            .with_description("Queryable field catalog: names, storage fallbacks, types, examples")
    }
}

/// Handler for `generate_attack_report`.
pub struct GenerateReportTool {
    pub(crate) renderer: Arc<dyn ReportRenderer>,
    pub(crate) output_directory: std::path::PathBuf,
}

#[async_trait]
impl ToolHandler for GenerateReportTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Attack Report");
        let data = args.get("data").cloned().unwrap_or(Value::Null);

        let template = format!(
            "#set page(paper: \"a4\")\n= {title}\n\n#raw(read(\"data.json\"), lang: \"json\")\n"
        );
        let bytes = self
            .renderer
            .render(ctx, &template, &data)
            .await
            .map_err(|e| e.into_server_error("report_renderer"))?;

        let file_name = format!("report-{}.pdf", uuid::Uuid::new_v4());
        let path = self.output_directory.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ServerError::Internal(format!("cannot write report: {e}")))?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes": bytes.len(),
        }))
    }
}

impl GenerateReportTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("generate_attack_report", ToolCategory::Report)
            .with_description("Render a PDF report from analysis data via the typesetter")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "data": {}
                },
                "required": ["data"],
                "additionalProperties": false
            }))
            .requires_feature("pdf_reports")
    }
}
