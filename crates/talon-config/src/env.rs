//! Environment variable overrides.
//!
//! Any scalar config path can be overridden by an uppercase-snake variable
//! prefixed with `TALON_`: `elasticsearch.url` becomes
//! `TALON_ELASTICSEARCH_URL`, `transport.tcp.port` becomes
//! `TALON_TRANSPORT_TCP_PORT`. Precedence is env > file > built-in default.
//! The override must parse as the same scalar type as the value it replaces.

use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// Env var prefix for all overrides.
const ENV_PREFIX: &str = "TALON";

/// Turn a dotted config path into its override variable name.
#[must_use]
pub fn var_name_for(path: &str) -> String {
    let mut name = String::from(ENV_PREFIX);
    for segment in path.split('.') {
        name.push('_');
        name.push_str(&segment.to_uppercase());
    }
    name
}

/// Apply overrides from the process environment onto the merged tree.
///
/// # Errors
///
/// Returns an error if an override value does not parse as the scalar type
/// of the value it replaces.
pub fn apply_env_overrides(tree: &mut Value) -> ConfigResult<()> {
    apply_with(tree, "", &|var| std::env::var(var).ok())
}

/// Internal: overrides via a custom resolver for testing.
pub(crate) fn apply_with<F>(tree: &mut Value, path: &str, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    match tree {
        Value::Mapping(map) => {
            for (key, value) in map.iter_mut() {
                let Some(key) = key.as_str() else { continue };
                let child_path = if path.is_empty() {
                    key.to_owned()
                } else {
                    format!("{path}.{key}")
                };
                apply_with(value, &child_path, lookup)?;
            }
            Ok(())
        },
        // Sequences (index patterns, key lists) are file-only.
        Value::Sequence(_) => Ok(()),
        scalar => {
            let var = var_name_for(path);
            if let Some(raw) = lookup(&var) {
                *scalar = parse_as(scalar, &var, &raw)?;
                tracing::debug!(var, path, "applied environment override");
            }
            Ok(())
        },
    }
}

/// Parse `raw` with the same scalar type as `current`.
fn parse_as(current: &Value, var: &str, raw: &str) -> ConfigResult<Value> {
    match current {
        Value::Bool(_) => match raw {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(ConfigError::BadOverride {
                var: var.to_owned(),
                expected: "boolean",
                value: raw.to_owned(),
            }),
        },
        Value::Number(n) if n.is_u64() || n.is_i64() => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ConfigError::BadOverride {
                var: var.to_owned(),
                expected: "integer",
                value: raw.to_owned(),
            }),
        Value::Number(_) => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| ConfigError::BadOverride {
                var: var.to_owned(),
                expected: "number",
                value: raw.to_owned(),
            }),
        _ => Ok(Value::String(raw.to_owned())),
    }
}
