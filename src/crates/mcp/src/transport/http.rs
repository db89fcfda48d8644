//! HTTP transport
//!
//! Each send is one POST of a JSON value; the response body is the
//! correlated reply, pushed onto the incoming channel as if it had arrived
//! on a stream. There are no server-to-client notifications on this
//! transport.
//!
//! POST failures are synthesized into JSON-RPC error responses carrying the
//! request's own id, so every outgoing request still completes exactly once
//! at the protocol layer.

use super::{Transport, TransportHandle, INCOMING_BUFFER};
use crate::protocol::{self, error_codes};
use crate::{McpError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// One-POST-per-message transport
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    // Taken on close so in-flight tasks drop the last senders and the
    // incoming receiver ends.
    incoming_tx: Mutex<Option<mpsc::Sender<Value>>>,
}

impl HttpTransport {
    /// Create the transport. No connection is established up front; the
    /// manager's `initialize` request doubles as the readiness check.
    pub fn open(url: &str, headers: &HashMap<String, String>) -> Result<TransportHandle> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| McpError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let (incoming_tx, incoming) = mpsc::channel(INCOMING_BUFFER);

        Ok(TransportHandle {
            transport: Box::new(Self {
                client,
                url: url.to_string(),
                headers: headers.clone(),
                incoming_tx: Mutex::new(Some(incoming_tx)),
            }),
            incoming,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let incoming_tx = self
            .incoming_tx
            .lock()
            .clone()
            .ok_or(McpError::ConnectionClosed)?;

        let mut request = self.client.post(&self.url).json(&message);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        // Requests carry an id; notifications do not and get no reply.
        let id = message.get("id").cloned();
        let url = self.url.clone();

        tokio::spawn(async move {
            let reply = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<Value>().await {
                        Ok(body) => Some(body),
                        Err(e) => id.map(|id| {
                            protocol::error_response(
                                id,
                                error_codes::PARSE_ERROR,
                                format!("Invalid response body: {}", e),
                            )
                        }),
                    }
                }
                Ok(response) => id.map(|id| {
                    protocol::error_response(
                        id,
                        error_codes::SERVER_ERROR,
                        format!("Server returned HTTP {}", response.status()),
                    )
                }),
                Err(e) => id.map(|id| {
                    protocol::error_response(
                        id,
                        error_codes::SERVER_ERROR,
                        format!("Request to {} failed: {}", url, e),
                    )
                }),
            };

            if let Some(reply) = reply {
                if incoming_tx.send(reply).await.is_err() {
                    warn!("HTTP reply arrived after transport close");
                }
            }
        });

        Ok(())
    }

    async fn close(&self) {
        if self.incoming_tx.lock().take().is_some() {
            debug!(url = %self.url, "HTTP transport closed");
        }
    }
}
