//! Argument validation against tool input schemas.

use jsonschema::JSONSchema;
use serde_json::Value;

use talon_core::{FieldError, ServerError, ServerResult};

/// Validate `args` against a compiled schema, collecting per-field detail.
///
/// # Errors
///
/// Returns [`ServerError::Validation`] listing every failing field.
pub fn validate_args(schema: &JSONSchema, args: &Value) -> ServerResult<()> {
    let result = schema.validate(args);
    let Err(errors) = result else {
        return Ok(());
    };
    let fields: Vec<FieldError> = errors
        .map(|error| {
            let path = error.instance_path.to_string();
            let field = if path.is_empty() {
                "arguments".to_owned()
            } else {
                path.trim_start_matches('/').replace('/', ".")
            };
            FieldError::new(field, error.to_string())
        })
        .collect();
    Err(ServerError::Validation { fields })
}

/// Compile a schema at registration time.
///
/// # Errors
///
/// Returns [`ServerError::Internal`] when the schema itself is malformed —
/// a programming error caught at startup, not at call time.
pub(crate) fn compile(schema: &Value) -> ServerResult<JSONSchema> {
    JSONSchema::compile(schema)
        .map_err(|e| ServerError::Internal(format!("invalid tool schema: {e}")))
}
