//! Report renderer: out-of-process typesetter.
//!
//! Contract: `(template, data) -> bytes`. Every invocation runs in a fresh
//! temporary working directory that is deleted on completion, under a
//! wall-clock timeout and an output-size cap. The subprocess is killed on
//! timeout or cancellation.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::Duration;

use talon_config::ReportConfig;
use talon_core::RequestCtx;

use crate::error::{BackendError, BackendResult};
use crate::health::HealthStatus;
use crate::traits::ReportRenderer;

/// The subprocess-backed renderer.
pub struct TypesetRenderer {
    binary: String,
    timeout: Duration,
    max_output_bytes: u64,
    output_directory: PathBuf,
}

impl TypesetRenderer {
    /// Build the renderer from config.
    #[must_use]
    pub fn new(config: &ReportConfig, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            binary: config.typesetter_binary.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            max_output_bytes: config.max_output_mb * 1024 * 1024,
            output_directory: output_directory.into(),
        }
    }
}

#[async_trait]
impl ReportRenderer for TypesetRenderer {
    async fn render(&self, ctx: &RequestCtx, template: &str, data: &Value) -> BackendResult<Vec<u8>> {
        // Isolated working directory, deleted when `workdir` drops.
        let workdir = tempfile::tempdir().map_err(|e| BackendError::Render(e.to_string()))?;
        let template_path = workdir.path().join("report.typ");
        let data_path = workdir.path().join("data.json");
        let output_path = workdir.path().join("report.pdf");

        tokio::fs::write(&template_path, template)
            .await
            .map_err(|e| BackendError::Render(e.to_string()))?;
        let data_bytes =
            serde_json::to_vec(data).map_err(|e| BackendError::Render(e.to_string()))?;
        tokio::fs::write(&data_path, data_bytes)
            .await
            .map_err(|e| BackendError::Render(e.to_string()))?;

        let mut child = Command::new(&self.binary)
            .arg("compile")
            .arg(&template_path)
            .arg(&output_path)
            .current_dir(workdir.path())
            .kill_on_drop(true)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::Connection(format!("cannot spawn typesetter: {e}")))?;

        // None = cancelled, Some(Err) = wall-clock timeout. The child is
        // only killed after the select ends so its wait future is gone.
        let waited = tokio::select! {
            () = ctx.cancel.cancelled() => None,
            result = tokio::time::timeout(self.timeout, child.wait()) => Some(result),
        };
        let status = match waited {
            None => {
                let _ = child.kill().await;
                return Err(BackendError::Cancelled);
            },
            Some(Err(_)) => {
                let _ = child.kill().await;
                return Err(BackendError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            },
            Some(Ok(status)) => status.map_err(|e| BackendError::Render(e.to_string()))?,
        };

        if !status.success() {
            return Err(BackendError::Render(format!(
                "typesetter exited with {status}"
            )));
        }

        let metadata = tokio::fs::metadata(&output_path)
            .await
            .map_err(|e| BackendError::Render(format!("no output produced: {e}")))?;
        if metadata.len() > self.max_output_bytes {
            return Err(BackendError::OutputTooLarge {
                size: metadata.len(),
                max: self.max_output_bytes,
            });
        }

        tracing::debug!(bytes = metadata.len(), "report rendered");
        tokio::fs::read(&output_path)
            .await
            .map_err(|e| BackendError::Render(e.to_string()))
    }

    async fn health(&self) -> HealthStatus {
        // The binary must exist and the output directory must be writable.
        let binary_ok = Command::new(&self.binary)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !binary_ok {
            return HealthStatus::unhealthy(format!("typesetter binary '{}' not runnable", self.binary));
        }

        let probe = self.output_directory.join(".talon-health-probe");
        let writable = tokio::fs::write(&probe, b"probe").await.is_ok();
        let _ = tokio::fs::remove_file(&probe).await;
        if writable {
            HealthStatus::healthy("typesetter ready")
        } else {
            HealthStatus::unhealthy(format!(
                "output directory {} not writable",
                self.output_directory.display()
            ))
        }
    }
}

impl std::fmt::Debug for TypesetRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypesetRenderer")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
