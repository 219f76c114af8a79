//! Wire protocol for session plugins.
//!
//! A plugin is started with `SESSION_PLUGIN=<magic>` in its environment. Its first
//! stdout line must be `1|SESSION_PLUGIN|<magic>|jsonrpc`. After that both sides
//! exchange JSON-RPC 2.0 messages with Content-Length framing over stdin/stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PluginError, Result};

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Environment variable carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "SESSION_PLUGIN";

/// Magic cookie value shared by host and plugin.
pub const MAGIC_COOKIE_VALUE: &str = "m9erzlkcuac9gy4a2szc19j7xjleo4s4epwiio9opv8tjv9sid0qetl7cjo6ulkiskorqyg26pcsfyf979pgn28s5a7byfbq0n66";

/// Plugin protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// RPC flavour named in the handshake.
pub const PROTOCOL_NAME: &str = "jsonrpc";

/// RPC method names.
pub mod method {
    pub const INIT: &str = "init";
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const DELETE: &str = "delete";
    pub const CLOSE: &str = "close";
}

/// The line a plugin prints on startup.
pub fn handshake_line() -> String {
    format!(
        "{}|{}|{}|{}",
        PROTOCOL_VERSION, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_NAME
    )
}

/// Verify a handshake line read from a plugin.
pub fn check_handshake(line: &str) -> Result<()> {
    let parts: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').collect();
    let [version, key, value, protocol] = parts.as_slice() else {
        return Err(PluginError::handshake(format!(
            "malformed handshake line: {:?}",
            line.trim()
        )));
    };

    let version: u32 = version
        .parse()
        .map_err(|_| PluginError::handshake(format!("invalid protocol version {:?}", version)))?;
    if version != PROTOCOL_VERSION {
        return Err(PluginError::handshake(format!(
            "unsupported protocol version {} (expected {})",
            version, PROTOCOL_VERSION
        )));
    }
    if *key != MAGIC_COOKIE_KEY || *value != MAGIC_COOKIE_VALUE {
        return Err(PluginError::handshake("magic cookie mismatch"));
    }
    if *protocol != PROTOCOL_NAME {
        return Err(PluginError::handshake(format!(
            "unsupported rpc protocol {:?}",
            protocol
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON-RPC Base Types
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID for correlating responses.
    pub id: u64,
    /// Method name to call.
    pub method: String,
    /// Method parameters (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID this response is for.
    pub id: u64,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Get the result, or return an error if this is an error response.
    pub fn into_result(self) -> std::result::Result<Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Invalid params.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Backend operation failed.
    pub const BACKEND_ERROR: i64 = -32000;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<JsonRpcError> for PluginError {
    fn from(err: JsonRpcError) -> Self {
        PluginError::server_error(err.code, err.message, err.data)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitParams {
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// Parameters for `get` and `delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

/// Parameters for `put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutParams {
    pub key: String,
    pub value: String,
}

/// Result of `get`. A missing key comes back as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetResult {
    #[serde(default)]
    pub value: Option<String>,
}
