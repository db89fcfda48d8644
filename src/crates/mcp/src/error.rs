//! Error types for the connection manager

use thiserror::Error;

/// Result type alias for connection-manager operations
pub type Result<T> = std::result::Result<T, McpError>;

/// Errors produced by transports, the protocol client, and the manager
#[derive(Debug, Error)]
pub enum McpError {
    /// Connection dropped, refused, or otherwise failed below the protocol
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON-RPC error response from the server
    #[error("Protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable message
        message: String,
        /// Optional structured error payload
        data: Option<serde_json::Value>,
    },

    /// Request deadline elapsed without a response
    #[error("Request '{method}' timed out after {seconds}s")]
    Timeout {
        /// Method of the timed-out request
        method: String,
        /// Deadline that elapsed
        seconds: u64,
    },

    /// Connection closed while requests were outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires the server to be connected
    #[error("Server '{0}' is not connected")]
    NotConnected(String),

    /// No server registered under the given id
    #[error("Server '{0}' is not registered")]
    ServerNotFound(String),

    /// Auto-discovery found no connected server advertising the tool
    #[error("No connected server provides tool '{0}'")]
    ToolNotFound(String),

    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Server record could not be persisted or loaded
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl McpError {
    /// Create a transport error from any displayable cause
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }

    /// Create a protocol error from a JSON-RPC error object
    pub fn protocol(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            data,
        }
    }
}
