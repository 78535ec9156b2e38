//! The tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use jsonschema::JSONSchema;

use talon_core::{PermissionSet, ServerResult};
use talon_health::FeatureManager;

use crate::definition::{ToolDefinition, ToolHandler};
use crate::schema::compile;

pub(crate) struct RegisteredTool {
    pub(crate) definition: ToolDefinition,
    pub(crate) schema: JSONSchema,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

/// Holds every tool, keyed by name. Built once at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. The schema is compiled here so malformed schemas
    /// fail startup, not calls.
    ///
    /// # Errors
    ///
    /// Returns an error when the input schema does not compile.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> ServerResult<()> {
        let schema = compile(&definition.input_schema)?;
        tracing::debug!(tool = %definition.name, "registered tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                schema,
                handler,
            },
        );
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// The definitions visible to a session: every required feature is
    /// available right now and the session holds the permission.
    #[must_use]
    pub fn visible(
        &self,
        features: &FeatureManager,
        permissions: PermissionSet,
    ) -> Vec<&ToolDefinition> {
        self.tools
            .values()
            .map(|t| &t.definition)
            .filter(|d| permissions.allows(d.required_permission))
            .filter(|d| d.required_features.iter().all(|f| features.is_available(f)))
            .collect()
    }

    /// Every definition, regardless of gating (for diagnostics).
    #[must_use]
    pub fn all(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .finish()
    }
}
