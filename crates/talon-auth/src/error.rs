//! Authentication error types.

use thiserror::Error;

use talon_core::ServerError;

/// Errors from authentication and session operations.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The presented key does not match the expected `tk_<id>.<secret>`
    /// shape, or the secret is too short.
    #[error("malformed api key")]
    MalformedKey,

    /// No record matches, or the hash comparison failed. The two cases are
    /// deliberately indistinguishable to the caller.
    #[error("invalid api key")]
    InvalidKey,

    /// The key's expiry has passed.
    #[error("api key expired")]
    ExpiredKey,

    /// The key was revoked.
    #[error("api key revoked")]
    RevokedKey,

    /// No session with that id.
    #[error("unknown session")]
    UnknownSession,

    /// A stored key record is malformed (bad salt or hash encoding).
    #[error("invalid key record '{id}': {detail}")]
    BadRecord {
        /// The offending key id.
        id: String,
        /// What was wrong.
        detail: String,
    },
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedKey | AuthError::InvalidKey => {
                Self::AuthRequired { kind: "invalid" }
            },
            AuthError::ExpiredKey => Self::AuthRequired { kind: "expired" },
            AuthError::RevokedKey => Self::AuthRevoked,
            AuthError::UnknownSession => Self::AuthRequired { kind: "missing" },
            AuthError::BadRecord { id, .. } => {
                // The detail stays server-side; it may describe key material.
                Self::Internal(format!("key record '{id}' is invalid"))
            },
        }
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
