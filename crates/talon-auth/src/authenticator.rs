//! The authenticator: key verification, session creation, revocation.

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use talon_config::AuthConfig;
use talon_core::{ConnectionId, KeyId, Permission, SessionId};

use crate::error::{AuthError, AuthResult};
use crate::key::{ApiKeyRecord, KeyUsage, parse_presented};
use crate::session::{Session, SessionTable};

/// Validates presented keys and owns the session table.
pub struct Authenticator {
    keys: DashMap<KeyId, ApiKeyRecord>,
    usage: DashMap<KeyId, KeyUsage>,
    sessions: SessionTable,
}

impl Authenticator {
    /// Build from the auth config section.
    ///
    /// # Errors
    ///
    /// Returns an error when a stored key record is malformed.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let keys = DashMap::new();
        for key_config in &config.keys {
            let record = ApiKeyRecord::from_config(key_config, &config.defaults)?;
            keys.insert(record.id.clone(), record);
        }
        tracing::info!(keys = keys.len(), "loaded api key records");
        Ok(Self {
            keys,
            usage: DashMap::new(),
            sessions: SessionTable::new(),
        })
    }

    /// Authenticate a presented key and bind a session to the connection.
    ///
    /// # Errors
    ///
    /// Returns a typed [`AuthError`]: malformed shape, unknown id, hash
    /// mismatch (indistinguishable from unknown), or expiry.
    pub fn authenticate(&self, presented: &str, connection: ConnectionId) -> AuthResult<Session> {
        let (key_id, secret) = parse_presented(presented)?;
        let record = self
            .keys
            .get(&key_id)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidKey)?;

        if !record.verify(secret) {
            tracing::warn!(key = %key_id, %connection, "api key verification failed");
            return Err(AuthError::InvalidKey);
        }
        if record.is_expired(Utc::now()) {
            return Err(AuthError::ExpiredKey);
        }

        let session = Session {
            id: SessionId::new(),
            key_id: record.id.clone(),
            connection_id: connection,
            created_at: Utc::now(),
            last_activity: Utc::now(),
            permissions: record.permissions,
            rate_limit_per_minute: record.rate_limit_per_minute,
            burst: record.burst,
            cancel: CancellationToken::new(),
        };
        self.sessions.insert(session.clone());
        tracing::info!(session = %session.id, key = %record.id, %connection, "session created");
        Ok(session)
    }

    /// Whether the session holds the permission.
    #[must_use]
    pub fn check_permission(&self, session_id: SessionId, permission: Permission) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|s| s.permissions.allows(permission))
    }

    /// Revoke a key: no future authentication, and every session holding it
    /// dies now. In-flight requests observe cancellation.
    pub fn revoke(&self, key: &KeyId) {
        self.keys.remove(key);
        self.usage.remove(key);
        let destroyed = self.sessions.remove_key(key);
        tracing::warn!(key = %key, sessions = destroyed, "api key revoked");
    }

    /// Record a completed call against the session's key.
    pub fn track_usage(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.get(session_id) {
            self.sessions.touch(session_id);
            let mut usage = self.usage.entry(session.key_id).or_default();
            usage.calls = usage.calls.saturating_add(1);
            usage.last_used = Some(Utc::now());
        }
    }

    /// Usage counters for a key, when it has been used.
    #[must_use]
    pub fn usage(&self, key: &KeyId) -> Option<KeyUsage> {
        self.usage.get(key).map(|u| *u)
    }

    /// The expiry of a stored key, when it has one.
    #[must_use]
    pub fn key_expiry(&self, key: &KeyId) -> Option<chrono::DateTime<Utc>> {
        self.keys.get(key).and_then(|record| record.expires_at)
    }

    /// The session table (shared with the server facade).
    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("keys", &self.keys.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
