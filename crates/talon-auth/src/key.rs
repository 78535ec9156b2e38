//! Api key records and verification.
//!
//! Presented keys have the shape `tk_<id>.<secret>`. The server stores only
//! the salt and `SHA-256(salt || secret)`; verification re-derives the hash
//! and compares in constant time. The one-way property means a leaked
//! record cannot recover the plaintext.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use talon_config::{ApiKeyConfig, AuthDefaultsConfig};
use talon_core::{KeyId, PermissionSet};

use crate::error::{AuthError, AuthResult};

/// Prefix on every presented key.
const KEY_PREFIX: &str = "tk_";

/// Minimum secret length accepted at the parse step.
const MIN_SECRET_LEN: usize = 32;

/// A stored api key. Holds the salted hash, never the secret.
#[derive(Clone)]
pub struct ApiKeyRecord {
    /// Opaque key id.
    pub id: KeyId,
    salt: Vec<u8>,
    hash: [u8; 32],
    /// Expiry; `None` means the key does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Permission grant.
    pub permissions: PermissionSet,
    /// Token-bucket refill rate.
    pub rate_limit_per_minute: u32,
    /// Token-bucket capacity.
    pub burst: u32,
}

impl ApiKeyRecord {
    /// Build a record from its config form, applying issuance defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadRecord`] when the salt or hash encoding is
    /// invalid.
    pub fn from_config(config: &ApiKeyConfig, defaults: &AuthDefaultsConfig) -> AuthResult<Self> {
        let salt = BASE64
            .decode(&config.salt)
            .map_err(|e| AuthError::BadRecord {
                id: config.id.clone(),
                detail: format!("salt is not base64: {e}"),
            })?;
        let hash_bytes = hex::decode(&config.hash).map_err(|e| AuthError::BadRecord {
            id: config.id.clone(),
            detail: format!("hash is not hex: {e}"),
        })?;
        let hash: [u8; 32] = hash_bytes.try_into().map_err(|_| AuthError::BadRecord {
            id: config.id.clone(),
            detail: "hash is not 32 bytes".to_owned(),
        })?;
        let expires_at = match &config.expires_at {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| AuthError::BadRecord {
                        id: config.id.clone(),
                        detail: format!("expires_at is not RFC 3339: {e}"),
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            id: KeyId::new(config.id.clone()),
            salt,
            hash,
            expires_at,
            permissions: config.permissions.unwrap_or(defaults.permissions),
            rate_limit_per_minute: config
                .rate_limit_per_minute
                .unwrap_or(defaults.rate_limit_per_minute),
            burst: defaults.burst,
        })
    }

    /// Verify a presented secret against the stored hash, in constant time.
    #[must_use]
    pub fn verify(&self, secret: &str) -> bool {
        let derived = derive_hash(&self.salt, secret);
        derived.ct_eq(&self.hash).into()
    }

    /// Whether the key is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

impl std::fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("id", &self.id)
            .field("hash", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

/// Usage counters tracked per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyUsage {
    /// Total successful tool calls.
    pub calls: u64,
    /// Last time the key was used.
    pub last_used: Option<DateTime<Utc>>,
}

/// Split a presented key into `(id, secret)`.
///
/// # Errors
///
/// Returns [`AuthError::MalformedKey`] when the shape is wrong.
pub(crate) fn parse_presented(key: &str) -> AuthResult<(KeyId, &str)> {
    let rest = key.strip_prefix(KEY_PREFIX).ok_or(AuthError::MalformedKey)?;
    let (id, secret) = rest.split_once('.').ok_or(AuthError::MalformedKey)?;
    if id.is_empty() || secret.len() < MIN_SECRET_LEN {
        return Err(AuthError::MalformedKey);
    }
    Ok((KeyId::new(id), secret))
}

fn derive_hash(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Issue a new key: generates a salt and secret, returns the record's
/// config form plus the presentable plaintext (shown exactly once).
///
/// Used by the operator tooling and by tests; the server itself never
/// creates keys at runtime.
#[must_use]
pub fn issue_key(id: &str, defaults: &AuthDefaultsConfig) -> (ApiKeyConfig, String) {
    use rand::RngCore;

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut secret_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret = hex::encode(secret_bytes);

    let hash = derive_hash(&salt, &secret);
    let expires_at = (defaults.expiration_days > 0).then(|| {
        (Utc::now() + chrono::Duration::days(i64::from(defaults.expiration_days))).to_rfc3339()
    });

    let config = ApiKeyConfig {
        id: id.to_owned(),
        salt: BASE64.encode(salt),
        hash: hex::encode(hash),
        expires_at,
        rate_limit_per_minute: None,
        permissions: None,
    };
    let presented = format!("{KEY_PREFIX}{id}.{secret}");
    (config, presented)
}
