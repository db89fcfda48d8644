//! Transports beneath the protocol client
//!
//! A transport moves one JSON value at a time in each direction. Outgoing
//! messages go through [`Transport::send`]; incoming messages arrive on the
//! mpsc receiver bundled in [`TransportHandle`]. The receiver ending means
//! the connection is closed.

mod http;
mod stdio;
mod ws;

pub use http::HttpTransport;
pub use stdio::StdioTransport;
pub use ws::WebSocketTransport;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Buffer size of the incoming message channel
pub(crate) const INCOMING_BUFFER: usize = 64;

/// How to reach a tool server (persisted as a tagged union)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking line-delimited JSON on stdio
    Stdio {
        /// Executable to launch
        command: String,
        /// Command arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Extra environment variables
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// One HTTP POST per message; the response body is the correlated reply
    Http {
        /// Endpoint URL
        url: String,
        /// Headers added to every request
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Long-lived WebSocket connection, one JSON value per frame
    Websocket {
        /// Endpoint URL (ws:// or wss://)
        url: String,
        /// Subprotocols offered during the handshake
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        protocols: Vec<String>,
        /// Headers added to the handshake request
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Short kind name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Websocket { .. } => "websocket",
        }
    }
}

/// Sender half of an established transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one JSON value to the server
    async fn send(&self, message: Value) -> Result<()>;

    /// Close the connection; the incoming receiver ends shortly after
    async fn close(&self);
}

/// An established connection: the sender half plus the incoming stream
pub struct TransportHandle {
    /// Sender half
    pub transport: Box<dyn Transport>,
    /// Incoming messages; ends when the connection closes
    pub incoming: mpsc::Receiver<Value>,
}

/// Creates transports from configs.
///
/// The manager uses [`DefaultTransportFactory`]; tests substitute in-memory
/// fakes.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Establish a connection for `config`
    async fn connect(&self, config: &TransportConfig) -> Result<TransportHandle>;
}

/// Factory producing the real stdio/HTTP/WebSocket transports
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(&self, config: &TransportConfig) -> Result<TransportHandle> {
        match config {
            TransportConfig::Stdio { command, args, env } => {
                StdioTransport::spawn(command, args, env).await
            }
            TransportConfig::Http { url, headers } => HttpTransport::open(url, headers),
            TransportConfig::Websocket {
                url,
                protocols,
                headers,
            } => WebSocketTransport::connect(url, protocols, headers).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_tagged_union_roundtrip() {
        let stdio: TransportConfig = serde_json::from_value(json!({
            "type": "stdio",
            "command": "mcp-files",
            "args": ["--root", "/data"]
        }))
        .unwrap();
        assert_eq!(stdio.kind(), "stdio");

        let http: TransportConfig = serde_json::from_value(json!({
            "type": "http",
            "url": "http://localhost:8080/rpc"
        }))
        .unwrap();
        assert_eq!(http.kind(), "http");

        let ws: TransportConfig = serde_json::from_value(json!({
            "type": "websocket",
            "url": "ws://localhost:8080/rpc",
            "protocols": ["jsonrpc"]
        }))
        .unwrap();
        assert_eq!(ws.kind(), "websocket");

        let encoded = serde_json::to_value(&ws).unwrap();
        assert_eq!(encoded["type"], "websocket");
        assert_eq!(encoded["protocols"][0], "jsonrpc");
    }

    #[test]
    fn test_config_omits_empty_collections() {
        let stdio = TransportConfig::Stdio {
            command: "server".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        };
        let encoded = serde_json::to_value(&stdio).unwrap();
        assert!(encoded.get("args").is_none());
        assert!(encoded.get("env").is_none());
    }
}
