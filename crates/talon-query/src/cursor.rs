//! Cursor encoding.
//!
//! A cursor is the base64 (standard alphabet) of a versioned JSON tuple:
//!
//! ```json
//! {"v":1,"ts":1722000000000,"id":"a1"}
//! ```
//!
//! `ts` is the `@timestamp` sort value in epoch milliseconds, `id` the
//! document `_id` tiebreak. The version field lets the encoding evolve;
//! decoding an unknown version is a validation error. Cursors are never
//! stored server-side — the token itself is the resume state.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use talon_backends::SortKey;
use talon_core::{ServerError, ServerResult};

/// Current cursor format version.
const VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct CursorV1 {
    v: u8,
    ts: i64,
    id: String,
}

/// Encode a sort position as an opaque cursor token.
#[must_use]
pub fn encode(key: &SortKey) -> String {
    let body = CursorV1 {
        v: VERSION,
        ts: key.timestamp_ms,
        id: key.id.clone(),
    };
    // Serialization of this struct cannot fail.
    let json = serde_json::to_vec(&body).unwrap_or_default();
    BASE64.encode(json)
}

/// Decode a cursor token back into a sort position.
///
/// # Errors
///
/// Returns a validation error for malformed base64/JSON or an unknown
/// version.
pub fn decode(token: &str) -> ServerResult<SortKey> {
    let bytes = BASE64
        .decode(token)
        .map_err(|_| ServerError::validation("cursor", "not valid base64"))?;
    let body: CursorV1 = serde_json::from_slice(&bytes)
        .map_err(|_| ServerError::validation("cursor", "malformed cursor payload"))?;
    if body.v != VERSION {
        return Err(ServerError::validation(
            "cursor",
            format!("unsupported cursor version {}", body.v),
        ));
    }
    Ok(SortKey {
        timestamp_ms: body.ts,
        id: body.id,
    })
}
