//! Server records and capability types

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection lifecycle state of a registered server.
///
/// `Error` is sticky: it is entered from `Connecting` or `Connected` and
/// cleared only by a new connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Registered but not connected
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Handshake complete, requests allowed
    Connected,
    /// Last connect or connection failed
    Error,
}

impl ServerStatus {
    /// Stable string form used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ServerStatus {
    fn from(s: &str) -> Self {
        match s {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "error" => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

/// Server identity and capabilities reported by the `initialize` handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name
    #[serde(default)]
    pub name: String,

    /// Server version
    #[serde(default)]
    pub version: String,

    /// Protocol revision the server speaks
    #[serde(default)]
    pub protocol_version: String,

    /// Capability flags advertised by the server
    #[serde(default)]
    pub capabilities: Value,
}

impl ServerInfo {
    /// Extract the server info from an `initialize` result payload
    pub fn from_initialize_result(result: &Value) -> Self {
        let info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        Self {
            name: info
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            version: info
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            capabilities: result.get("capabilities").cloned().unwrap_or(Value::Null),
        }
    }
}

/// One tool advertised by a server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, unique per server
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON schema of the tool's arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Result of a `tools/call` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content blocks produced by the tool
    #[serde(default)]
    pub content: Vec<Value>,

    /// Whether the tool reported a failure
    #[serde(default)]
    pub is_error: bool,
}

/// A registered tool server.
///
/// Registrations outlive individual connections: disconnect keeps the
/// record (and its cached tool list, for diagnostics); unregister removes
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredServer {
    /// Stable server id
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Display name
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How to reach the server
    pub transport: crate::transport::TransportConfig,

    /// Current lifecycle state
    pub status: ServerStatus,

    /// Identity reported by the last successful handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,

    /// Cached tool catalog from the last `tools/list`
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Last error message, set while status is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the current connection was established (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<i64>,

    /// Registration time (Unix seconds)
    pub created_at: i64,

    /// Last record update (Unix seconds)
    pub updated_at: i64,
}

impl RegisteredServer {
    /// Create a new registration in the `Disconnected` state
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        transport: crate::transport::TransportConfig,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: None,
            transport,
            status: ServerStatus::Disconnected,
            server_info: None,
            tools: Vec::new(),
            error: None,
            connected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the server accepts requests
    pub fn is_connected(&self) -> bool {
        self.status == ServerStatus::Connected
    }

    /// Whether the cached catalog advertises `tool`
    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool)
    }
}
