//! JSON-RPC 2.0 wire format
//!
//! Framing invariants:
//! - every message carries `jsonrpc: "2.0"`
//! - a message with an `id` is a request (if it also has `method`) or a
//!   response (if it has `result` or `error`)
//! - a message with `method` but no `id` is a notification

use crate::{McpError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision sent in the `initialize` handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names consumed and emitted by the client
pub mod methods {
    /// Lifecycle handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Handshake-complete notification
    pub const INITIALIZED: &str = "initialized";
    /// Liveness check request
    pub const PING: &str = "ping";
    /// Orderly shutdown notification
    pub const SHUTDOWN: &str = "shutdown";

    /// Tool discovery request
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request
    pub const TOOLS_CALL: &str = "tools/call";
    /// Tool catalog change notification
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

    /// Prompt discovery request
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Prompt fetch request
    pub const PROMPTS_GET: &str = "prompts/get";
    /// Prompt catalog change notification
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

    /// Resource discovery request
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Resource read request
    pub const RESOURCES_READ: &str = "resources/read";
    /// Resource catalog change notification
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
}

/// JSON-RPC error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The message is not a valid request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Generic server error
    pub const SERVER_ERROR: i64 = -32000;
    /// The named tool is not provided by the server
    pub const TOOL_NOT_FOUND: i64 = -32001;
    /// The tool ran and failed
    pub const TOOL_EXECUTION_ERROR: i64 = -32002;
}

/// An outgoing request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always [`JSONRPC_VERSION`]
    pub jsonrpc: &'static str,
    /// Client-generated correlation id, unique per connection
    pub id: u64,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// An outgoing notification (no id, no reply)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always [`JSONRPC_VERSION`]
    pub jsonrpc: &'static str,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Error object of a JSON-RPC error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    /// Error code (see [`error_codes`])
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for McpError {
    fn from(e: RpcError) -> Self {
        McpError::Protocol {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// A parsed incoming message
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Response correlated to an outgoing request
    Response {
        /// Correlation id, canonicalized to a string
        id: String,
        /// Result payload on success
        result: Option<Value>,
        /// Error object on failure
        error: Option<RpcError>,
    },
    /// Server-initiated request (carries an id and expects a reply)
    Request {
        /// Server-generated id, echoed in the reply
        id: Value,
        /// Method name
        method: String,
        /// Method parameters
        params: Option<Value>,
    },
    /// Notification (no reply expected)
    Notification {
        /// Method name
        method: String,
        /// Method parameters
        params: Option<Value>,
    },
}

/// Canonical string form of a wire id (numbers and strings both occur)
pub fn canonical_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Classify one incoming JSON value per the framing invariants.
pub fn parse_incoming(value: &Value) -> Result<IncomingMessage> {
    let obj = value
        .as_object()
        .ok_or_else(|| McpError::transport("Message is not a JSON object"))?;

    let method = obj.get("method").and_then(|m| m.as_str());
    let id = obj.get("id").filter(|id| !id.is_null());

    match (id, method) {
        (Some(id), Some(method)) => Ok(IncomingMessage::Request {
            id: id.clone(),
            method: method.to_string(),
            params: obj.get("params").cloned(),
        }),
        (Some(id), None) => {
            let error = match obj.get("error") {
                Some(e) => Some(serde_json::from_value::<RpcError>(e.clone())?),
                None => None,
            };
            let result = obj.get("result").cloned();
            if result.is_none() && error.is_none() {
                return Err(McpError::transport(
                    "Response carries neither result nor error",
                ));
            }
            Ok(IncomingMessage::Response {
                id: canonical_id(id),
                result,
                error,
            })
        }
        (None, Some(method)) => Ok(IncomingMessage::Notification {
            method: method.to_string(),
            params: obj.get("params").cloned(),
        }),
        (None, None) => Err(McpError::transport(
            "Message carries neither id nor method",
        )),
    }
}

/// Build an error-response value (used to answer server-initiated requests
/// this client does not serve, and to synthesize transport failures).
pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}
