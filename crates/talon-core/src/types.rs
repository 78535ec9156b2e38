//! Shared identifier and permission types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Opaque identifier for an issued api key (never the secret itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub String);

impl KeyId {
    /// Create a key ID from its opaque string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier attached to every request for log tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a new random correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to grep logs.
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A single permission an api key may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Invoke read-only query and analysis tools.
    ReadTools,
    /// Reserved for future write-back operations (never granted by default).
    WriteBack,
    /// Administrative operations (key rotation, analytics).
    Admin,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadTools => write!(f, "read_tools"),
            Self::WriteBack => write!(f, "write_back"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// The full permission set attached to an api key or session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// May invoke read-only tools.
    pub read_tools: bool,
    /// May invoke write-back operations.
    pub write_back: bool,
    /// May invoke administrative tools.
    pub admin: bool,
}

impl PermissionSet {
    /// The default analyst grant: read-only tool access.
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            read_tools: true,
            write_back: false,
            admin: false,
        }
    }

    /// Whether this set allows the given permission.
    ///
    /// Admin implies every other permission.
    #[must_use]
    pub const fn allows(&self, permission: Permission) -> bool {
        if self.admin {
            return true;
        }
        match permission {
            Permission::ReadTools => self.read_tools,
            Permission::WriteBack => self.write_back,
            Permission::Admin => self.admin,
        }
    }
}

/// Category a tool belongs to, published in `tools/list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Campaign correlation and analysis.
    Campaign,
    /// Event queries and streaming.
    Query,
    /// Report generation.
    Report,
    /// Utility lookups (data dictionary, capabilities).
    Utility,
    /// Server self-monitoring.
    Monitoring,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Campaign => write!(f, "campaign"),
            Self::Query => write!(f, "query"),
            Self::Report => write!(f, "report"),
            Self::Utility => write!(f, "utility"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_set_allows() {
        let read_only = PermissionSet::read_only();
        assert!(read_only.allows(Permission::ReadTools));
        assert!(!read_only.allows(Permission::WriteBack));
        assert!(!read_only.allows(Permission::Admin));
    }

    #[test]
    fn test_admin_implies_all() {
        let admin = PermissionSet {
            read_tools: false,
            write_back: false,
            admin: true,
        };
        assert!(admin.allows(Permission::ReadTools));
        assert!(admin.allows(Permission::WriteBack));
        assert!(admin.allows(Permission::Admin));
    }

    #[test]
    fn test_correlation_id_display_is_short() {
        let id = CorrelationId::new();
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_permission_serde_snake_case() {
        let json = serde_json::to_string(&Permission::ReadTools).unwrap();
        assert_eq!(json, "\"read_tools\"");
    }
}
