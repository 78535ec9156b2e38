//! Session table.
//!
//! A session binds one connection to one api key. Connections hold at most
//! one session; sessions die with their connection, their key, or idleness.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use talon_core::{ConnectionId, KeyId, PermissionSet, SessionId};

/// An authenticated binding between a connection and an api key.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id, returned to the client.
    pub id: SessionId,
    /// The key this session authenticated with.
    pub key_id: KeyId,
    /// The connection the session is bound to.
    pub connection_id: ConnectionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last request time, used for idle expiry.
    pub last_activity: DateTime<Utc>,
    /// Effective permissions, snapshotted at authentication.
    pub permissions: PermissionSet,
    /// Per-key refill rate, snapshotted for the rate limiter.
    pub rate_limit_per_minute: u32,
    /// Per-key burst, snapshotted for the rate limiter.
    pub burst: u32,
    /// Cancelled when the session is destroyed; in-flight requests derive
    /// their tokens from it.
    pub cancel: CancellationToken,
}

/// Thread-safe session storage with a connection index.
#[derive(Default)]
pub struct SessionTable {
    by_id: DashMap<SessionId, Session>,
    by_connection: DashMap<ConnectionId, SessionId>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session, replacing any session already bound to the
    /// connection (the old one is cancelled).
    pub fn insert(&self, session: Session) {
        if let Some(previous) = self.by_connection.insert(session.connection_id, session.id) {
            if let Some((_, old)) = self.by_id.remove(&previous) {
                old.cancel.cancel();
            }
        }
        self.by_id.insert(session.id, session);
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    /// Look up the session bound to a connection.
    #[must_use]
    pub fn get_by_connection(&self, connection: ConnectionId) -> Option<Session> {
        self.by_connection
            .get(&connection)
            .and_then(|id| self.get(*id))
    }

    /// Bump a session's last-activity time.
    pub fn touch(&self, id: SessionId) {
        if let Some(mut session) = self.by_id.get_mut(&id) {
            session.last_activity = Utc::now();
        }
    }

    /// Destroy the session bound to a connection (connection closed).
    pub fn remove_connection(&self, connection: ConnectionId) {
        if let Some((_, id)) = self.by_connection.remove(&connection) {
            if let Some((_, session)) = self.by_id.remove(&id) {
                session.cancel.cancel();
            }
        }
    }

    /// Destroy every session holding the given key; returns how many died.
    pub fn remove_key(&self, key: &KeyId) -> usize {
        let doomed: Vec<Session> = self
            .by_id
            .iter()
            .filter(|entry| &entry.key_id == key)
            .map(|entry| entry.value().clone())
            .collect();
        for session in &doomed {
            self.by_id.remove(&session.id);
            self.by_connection.remove(&session.connection_id);
            session.cancel.cancel();
        }
        doomed.len()
    }

    /// Destroy sessions idle longer than `max_idle_seconds`; returns how
    /// many died.
    pub fn expire_idle(&self, max_idle_seconds: u64) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(i64::try_from(max_idle_seconds).unwrap_or(i64::MAX));
        let doomed: Vec<Session> = self
            .by_id
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| entry.value().clone())
            .collect();
        for session in &doomed {
            self.by_id.remove(&session.id);
            self.by_connection.remove(&session.connection_id);
            session.cancel.cancel();
        }
        doomed.len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("sessions", &self.by_id.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(connection: u64, key: &str) -> Session {
        Session {
            id: SessionId::new(),
            key_id: KeyId::new(key),
            connection_id: ConnectionId(connection),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            permissions: PermissionSet::read_only(),
            rate_limit_per_minute: 60,
            burst: 10,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_connection_index() {
        let table = SessionTable::new();
        let s = session(1, "k1");
        let id = s.id;
        table.insert(s);
        assert_eq!(table.get_by_connection(ConnectionId(1)).unwrap().id, id);
        assert!(table.get_by_connection(ConnectionId(2)).is_none());
    }

    #[test]
    fn test_reauth_replaces_and_cancels_old_session() {
        let table = SessionTable::new();
        let old = session(1, "k1");
        let old_cancel = old.cancel.clone();
        table.insert(old);
        table.insert(session(1, "k2"));
        assert_eq!(table.len(), 1);
        assert!(old_cancel.is_cancelled());
        assert_eq!(
            table.get_by_connection(ConnectionId(1)).unwrap().key_id,
            KeyId::new("k2")
        );
    }

    #[test]
    fn test_remove_key_cancels_all_its_sessions() {
        let table = SessionTable::new();
        let a = session(1, "k1");
        let b = session(2, "k1");
        let c = session(3, "k2");
        let cancels = [a.cancel.clone(), b.cancel.clone()];
        let survivor = c.cancel.clone();
        table.insert(a);
        table.insert(b);
        table.insert(c);

        assert_eq!(table.remove_key(&KeyId::new("k1")), 2);
        assert_eq!(table.len(), 1);
        assert!(cancels.iter().all(|c| c.is_cancelled()));
        assert!(!survivor.is_cancelled());
    }

    #[test]
    fn test_connection_close_destroys_session() {
        let table = SessionTable::new();
        let s = session(1, "k1");
        let cancel = s.cancel.clone();
        table.insert(s);
        table.remove_connection(ConnectionId(1));
        assert!(table.is_empty());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_expire_idle() {
        let table = SessionTable::new();
        let mut stale = session(1, "k1");
        stale.last_activity = Utc::now() - chrono::Duration::hours(1);
        table.insert(stale);
        table.insert(session(2, "k2"));
        assert_eq!(table.expire_idle(300), 1);
        assert_eq!(table.len(), 1);
    }
}
