//! Talon Auth - bearer-key authentication for the Talon SIEM tool-server.
//!
//! This crate provides:
//! - Api key records storing only `salt + SHA-256(salt || secret)`
//! - Constant-time verification of presented keys
//! - The session table binding connections to keys
//! - Revocation that cancels in-flight requests on the revoked sessions
//!
//! Plaintext keys are never persisted or logged; key records render their
//! hash as `<redacted>` in debug output.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod authenticator;
mod error;
mod key;
mod session;

pub use authenticator::Authenticator;
pub use error::{AuthError, AuthResult};
pub use key::{ApiKeyRecord, KeyUsage, issue_key};
pub use session::{Session, SessionTable};
