//! `vault://` secret resolution.
//!
//! Walks the merged config tree and replaces every string value of the form
//! `vault://<path>` with plaintext fetched from the external vault CLI
//! (`<vault_command> get <path>`, plaintext on stdout). Each distinct path
//! is fetched once and cached in memory for the process lifetime; nothing is
//! ever written to disk.
//!
//! Failure policy: resolution failure for a non-optional secret aborts
//! startup. Paths under `threat_intel` are optional — a failure there logs a
//! warning and leaves the reference in place, so the dependent feature
//! reports unhealthy instead of blocking the server.

use std::collections::HashMap;
use std::process::Command;

use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// Scheme prefix marking a secret reference.
const VAULT_SCHEME: &str = "vault://";

/// Resolves `vault://` references through the external vault CLI.
pub struct SecretResolver {
    vault_command: String,
    cache: HashMap<String, String>,
}

impl SecretResolver {
    /// Create a resolver invoking the given CLI binary.
    #[must_use]
    pub fn new(vault_command: impl Into<String>) -> Self {
        Self {
            vault_command: vault_command.into(),
            cache: HashMap::new(),
        }
    }

    /// Resolve every reference in the tree in place.
    ///
    /// # Errors
    ///
    /// Returns an error when a non-optional secret cannot be resolved.
    pub fn resolve_tree(&mut self, tree: &mut Value) -> ConfigResult<()> {
        self.walk(tree, "")
    }

    fn walk(&mut self, value: &mut Value, path: &str) -> ConfigResult<()> {
        match value {
            Value::Mapping(map) => {
                for (key, child) in map.iter_mut() {
                    let Some(key) = key.as_str() else { continue };
                    let child_path = if path.is_empty() {
                        key.to_owned()
                    } else {
                        format!("{path}.{key}")
                    };
                    self.walk(child, &child_path)?;
                }
                Ok(())
            },
            Value::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            },
            Value::String(s) if s.starts_with(VAULT_SCHEME) => {
                let reference = s.clone();
                match self.fetch(&reference) {
                    Ok(plaintext) => {
                        *s = plaintext;
                        debug!(path, "resolved secret reference");
                        Ok(())
                    },
                    Err(detail) if is_optional(path) => {
                        warn!(path, %detail, "optional secret unresolved; feature will report unhealthy");
                        Ok(())
                    },
                    Err(detail) => Err(ConfigError::SecretResolution {
                        reference,
                        detail: detail.to_string(),
                    }),
                }
            },
            _ => Ok(()),
        }
    }

    /// Fetch one secret, consulting the in-memory cache first.
    fn fetch(&mut self, reference: &str) -> Result<String, String> {
        if let Some(cached) = self.cache.get(reference) {
            return Ok(cached.clone());
        }
        let vault_path = reference
            .strip_prefix(VAULT_SCHEME)
            .ok_or_else(|| "not a vault reference".to_owned())?;

        let output = Command::new(&self.vault_command)
            .arg("get")
            .arg(vault_path)
            .output()
            .map_err(|e| format!("cannot run vault CLI: {e}"))?;

        if !output.status.success() {
            // Stderr may describe the missing path; it never carries the value.
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("vault CLI exited {}: {}", output.status, stderr.trim()));
        }

        let plaintext = String::from_utf8(output.stdout)
            .map_err(|_| "vault CLI emitted non-UTF-8 output".to_owned())?
            .trim_end_matches('\n')
            .to_owned();
        self.cache.insert(reference.to_owned(), plaintext.clone());
        Ok(plaintext)
    }
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("vault_command", &self.vault_command)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Whether a failed secret at this path degrades a feature instead of
/// aborting startup.
fn is_optional(path: &str) -> bool {
    path.starts_with("threat_intel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_references_untouched() {
        let mut resolver = SecretResolver::new("/nonexistent-vault-cli");
        let mut tree: Value = serde_yaml::from_str("elasticsearch:\n  password: plain\n").unwrap();
        resolver.resolve_tree(&mut tree).unwrap();
        assert_eq!(tree["elasticsearch"]["password"], Value::String("plain".into()));
    }

    #[test]
    fn test_required_secret_failure_aborts() {
        let mut resolver = SecretResolver::new("/nonexistent-vault-cli");
        let mut tree: Value =
            serde_yaml::from_str("elasticsearch:\n  password: vault://siem/es\n").unwrap();
        let result = resolver.resolve_tree(&mut tree);
        assert!(matches!(result, Err(ConfigError::SecretResolution { .. })));
    }

    #[test]
    fn test_optional_secret_failure_leaves_reference() {
        let mut resolver = SecretResolver::new("/nonexistent-vault-cli");
        let mut tree: Value =
            serde_yaml::from_str("threat_intel:\n  api_key: vault://intel/key\n").unwrap();
        resolver.resolve_tree(&mut tree).unwrap();
        assert_eq!(
            tree["threat_intel"]["api_key"],
            Value::String("vault://intel/key".into())
        );
    }

    #[test]
    fn test_cache_serves_repeat_references() {
        let mut resolver = SecretResolver::new("/nonexistent-vault-cli");
        resolver
            .cache
            .insert("vault://siem/es".to_owned(), "s3cret".to_owned());
        let mut tree: Value = serde_yaml::from_str(
            "elasticsearch:\n  password: vault://siem/es\nother:\n  copy: vault://siem/es\n",
        )
        .unwrap();
        resolver.resolve_tree(&mut tree).unwrap();
        assert_eq!(tree["elasticsearch"]["password"], Value::String("s3cret".into()));
        assert_eq!(tree["other"]["copy"], Value::String("s3cret".into()));
    }
}
