//! JSON-RPC 2.0 envelopes.
//!
//! Outgoing envelopes are built as `serde_json::Value` objects whose members
//! keep insertion order, so a request always serializes as
//! `{"jsonrpc":"2.0","id":1,"method":"ping","params":null}`.
//!
//! Incoming documents are sorted into [`Incoming`] variants by
//! [`classify`], which the client's read loop routes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result, INTERNAL_ERROR, UNKNOWN_ERROR_MESSAGE};

/// Protocol version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Build a request envelope.
pub fn make_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a notification envelope (no id field).
pub fn make_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params
    })
}

/// Build a success reply to a peer's request.
pub fn make_reply(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result
    })
}

/// Build an error reply to a peer's request.
pub fn make_error_reply(id: Value, error: &RpcError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": error
    })
}

/// The `error` member of a failure reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error object without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Extract an error object leniently from whatever the peer sent.
    ///
    /// A missing code becomes `-32603`; an empty message becomes
    /// "Unknown error occurred".
    pub fn from_value(value: &Value) -> Self {
        let (code, message, data) = match value {
            Value::Object(map) => (
                map.get("code").and_then(Value::as_i64),
                map.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                map.get("data").cloned(),
            ),
            Value::String(text) => (None, Some(text.clone()), None),
            other => (None, Some(other.to_string()), None),
        };

        let message = match message {
            Some(message) if !message.is_empty() => message,
            _ => UNKNOWN_ERROR_MESSAGE.to_string(),
        };

        Self {
            code: code.unwrap_or(INTERNAL_ERROR),
            message,
            data,
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Error::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// An inbound document, sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// One-way message: no id, non-empty method.
    Notification {
        /// Method name
        method: String,
        /// Parameters, `null` when absent
        params: Value,
    },
    /// Successful reply to one of our calls.
    Reply {
        /// Id of the call being answered
        id: i64,
        /// The result member, possibly `null`
        result: Value,
    },
    /// Request from the peer expecting our reply.
    Call {
        /// Method name
        method: String,
        /// The peer's id, echoed back verbatim in the reply
        id: Value,
        /// Parameters as sent, possibly `null`
        params: Value,
    },
    /// Failure reply, possibly tied to one of our calls.
    Error {
        /// Id of the failed call, if the peer supplied one
        id: Option<i64>,
        /// The error object
        error: RpcError,
    },
    /// A well-formed envelope matching none of the shapes above.
    Unhandled(Value),
}

/// Interpret an id as one of our request ids.
///
/// Ids are sent as integers; numeric strings are accepted too.
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}

/// Sort an inbound document into an [`Incoming`] variant.
///
/// # Errors
///
/// Returns `Error::InvalidData` when the document is not a JSON-RPC 2.0
/// object, or when a reply carries an id we could never have issued. These
/// break the protocol badly enough that the connection should be torn down.
/// Anything else that fits none of the shapes comes back as
/// [`Incoming::Unhandled`].
pub fn classify(message: Value) -> Result<Incoming> {
    let Value::Object(mut map) = message else {
        return Err(Error::InvalidData(
            "Received malformed response from peer".to_string(),
        ));
    };

    if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(Error::InvalidData(
            "Received malformed response from peer".to_string(),
        ));
    }

    let has_id = map.contains_key("id");
    let method = map.get("method").and_then(Value::as_str).map(str::to_string);

    if !has_id {
        if let Some(method) = method.as_ref().filter(|m| !m.is_empty()) {
            let params = map.remove("params").unwrap_or(Value::Null);
            return Ok(Incoming::Notification {
                method: method.clone(),
                params,
            });
        }
    }

    if has_id && map.contains_key("result") {
        let id = map.get("id").and_then(parse_id).ok_or_else(|| {
            Error::InvalidData("Reply to missing or invalid task".to_string())
        })?;
        let result = map.remove("result").unwrap_or(Value::Null);
        return Ok(Incoming::Reply { id, result });
    }

    // A call needs a string method and a params member; an empty method is
    // still a call and ends up answered with method-not-found
    if has_id && map.contains_key("params") {
        if let Some(method) = method {
            let id = map.remove("id").unwrap_or(Value::Null);
            let params = map.remove("params").unwrap_or(Value::Null);
            return Ok(Incoming::Call { method, id, params });
        }
    }

    if let Some(error) = map.get("error") {
        let error = RpcError::from_value(error);
        let id = map.get("id").and_then(parse_id);
        return Ok(Incoming::Error { id, error });
    }

    Ok(Incoming::Unhandled(Value::Object(map)))
}
