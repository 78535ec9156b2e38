//! Config discovery and layered loading.
//!
//! Implements the `load()` algorithm:
//! 1. Parse embedded `defaults.yaml` → base tree
//! 2. Deep-merge the operator's config file (when given) over it
//! 3. Apply `TALON_*` environment overrides to scalars
//! 4. Resolve `vault://` secret references
//! 5. Deserialize the merged tree → [`Config`]
//! 6. Validate
//!
//! The returned config is immutable for the process lifetime.

use std::path::Path;

use serde_yaml::Value;
use tracing::info;

use crate::env::apply_env_overrides;
use crate::error::{ConfigError, ConfigResult};
use crate::secrets::SecretResolver;
use crate::types::Config;
use crate::validate::validate;

/// Embedded default configuration.
const DEFAULTS_YAML: &str = include_str!("defaults.yaml");

/// Load the configuration, optionally merging an operator file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any layer is malformed, a required secret
/// cannot be resolved, or the final configuration fails validation.
pub fn load(config_path: Option<&Path>) -> ConfigResult<Config> {
    let mut merged: Value =
        serde_yaml::from_str(DEFAULTS_YAML).map_err(|e| ConfigError::Parse {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    if let Some(path) = config_path {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: Value = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded config file");
    }

    apply_env_overrides(&mut merged)?;

    // Secret resolution needs the vault command, which itself may have been
    // overridden; read it from the merged tree before typing it.
    let vault_command = merged
        .get("secrets")
        .and_then(|s| s.get("vault_command"))
        .and_then(Value::as_str)
        .unwrap_or("talon-vault")
        .to_owned();
    SecretResolver::new(vault_command).resolve_tree(&mut merged)?;

    let config: Config = serde_yaml::from_value(merged).map_err(ConfigError::Shape)?;
    validate(&config)?;
    Ok(config)
}

/// Recursively merge `overlay` into `base`. Mappings merge key-wise;
/// everything else (scalars, sequences) is replaced wholesale.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if let Some(base_value) = base_map.get_mut(&key) {
                    deep_merge(base_value, overlay_value);
                } else {
                    base_map.insert(key, overlay_value);
                }
            }
        },
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}
