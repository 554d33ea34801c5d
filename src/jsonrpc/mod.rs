//! JSON-RPC 2.0 envelopes and the wire error taxonomy.
//!
//! Errors are values, not Rust errors: a handler that fails produces an
//! [`RpcError`] which serializes into the `error` member of a response
//! envelope. Server-range codes (-32099..=-32000) can be refined with
//! [`RpcError::with_code`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const VERSION: &str = "2.0";

/// A JSON-RPC request envelope.
///
/// `id` is kept as a raw [`Value`] because the protocol allows string ids,
/// null ids and absent ids, and the broker stamps ids in after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A JSON-RPC error object, serialized as `{code, message, data?}`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl RpcError {
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(-32600, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(-32601, "Method not found")
    }

    pub fn invalid_params() -> Self {
        Self::new(-32602, "Invalid params")
    }

    pub fn internal() -> Self {
        Self::new(-32603, "Internal error")
    }

    pub fn server() -> Self {
        Self::new(-32000, "Server error")
    }

    fn new(code: i32, message: &'static str) -> Self {
        Self {
            code,
            message,
            data: Map::new(),
        }
    }

    /// Refine the code of a server-range error. Non-server errors and codes
    /// outside -32099..=-32000 are left untouched.
    pub fn with_code(mut self, code: i32) -> Self {
        if (-32099..=-32000).contains(&self.code) && (-32099..=-32000).contains(&code) {
            self.code = code;
        }
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.code, self.message)
    }
}

fn id_value(id: &str) -> Value {
    if id.is_empty() {
        Value::Null
    } else {
        Value::String(id.to_string())
    }
}

/// Build a response envelope with a `result` member. An empty id becomes the
/// JSON literal `null`.
pub fn build_resp(id: &str, result: &Value) -> Vec<u8> {
    let resp = json!({
        "jsonrpc": VERSION,
        "id": id_value(id),
        "result": result,
    });
    serde_json::to_vec(&resp).expect("json value always serializes")
}

/// Build a response envelope with an `error` member. An empty id becomes the
/// JSON literal `null`.
pub fn build_err_resp(id: &str, err: &RpcError) -> Vec<u8> {
    let resp = json!({
        "jsonrpc": VERSION,
        "id": id_value(id),
        "error": err,
    });
    serde_json::to_vec(&resp).expect("json value always serializes")
}
