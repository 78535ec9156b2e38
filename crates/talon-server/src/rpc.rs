//! JSON-RPC 2.0 frame types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use talon_core::ServerError;

/// A parsed JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Protocol marker; must be exactly `"2.0"`.
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Parameters object.
    #[serde(default)]
    pub params: Value,
}

/// A serialized response frame.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
struct RpcErrorBody {
    code: i32,
    message: String,
    data: Value,
}

impl RpcResponse {
    /// A success response.
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response from a typed server error.
    #[must_use]
    pub fn error(id: Value, err: &ServerError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: err.code().code(),
                message: err.to_string(),
                data: err.data(),
            }),
        }
    }

    /// Serialize to the wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            // A response that cannot serialize is a server bug; fall back
            // to a minimal internal error frame.
            br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal error"}}"#
                .to_vec()
        })
    }
}

/// Outcome of parsing one inbound frame.
#[derive(Debug)]
pub enum ParsedFrame {
    /// A well-formed request.
    Request(RpcRequest),
    /// A notification (no id); processed without a response.
    Notification(RpcRequest),
    /// Broken JSON, but the id was recoverable: answer PARSE_ERROR.
    Unparseable {
        /// The recovered id (null when absent).
        id: Value,
    },
    /// Broken JSON, id unrecoverable: close the connection.
    Fatal,
    /// Valid JSON but not JSON-RPC 2.0: answer INVALID_REQUEST.
    Invalid {
        /// The request id, when present.
        id: Value,
        /// What was wrong.
        reason: String,
    },
}

/// Parse one frame.
#[must_use]
pub fn parse_frame(payload: &[u8]) -> ParsedFrame {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => {
            // JSON that broke mid-body often still has an intact id; a
            // recoverable id gets a PARSE_ERROR response instead of a
            // connection close.
            return match salvage_id(payload) {
                Some(id) => ParsedFrame::Unparseable { id },
                None => ParsedFrame::Fatal,
            };
        },
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return ParsedFrame::Invalid {
                id,
                reason: e.to_string(),
            };
        },
    };

    if request.jsonrpc != "2.0" {
        return ParsedFrame::Invalid {
            id,
            reason: "jsonrpc must be \"2.0\"".to_owned(),
        };
    }
    if request.id.is_none() {
        return ParsedFrame::Notification(request);
    }
    ParsedFrame::Request(request)
}

/// Best-effort id recovery from broken JSON: find `"id"` and parse the
/// token after the colon as a number or string.
fn salvage_id(payload: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(payload).ok()?;
    let key_at = text.find("\"id\"")?;
    let after_colon = text[key_at + 4..].trim_start().strip_prefix(':')?.trim_start();

    if let Some(rest) = after_colon.strip_prefix('"') {
        let end = rest.find('"')?;
        return Some(Value::from(&rest[..end]));
    }
    let end = after_colon
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(after_colon.len());
    after_colon[..end].parse::<i64>().ok().map(Value::from)
}
