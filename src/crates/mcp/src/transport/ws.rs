//! WebSocket transport
//!
//! A single long-lived connection; each text frame is one JSON value in
//! either direction. A background task drains the read half into the
//! incoming channel, answers pings, and ends on a close frame or stream
//! error.

use super::{Transport, TransportHandle, INCOMING_BUFFER};
use crate::{McpError, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde_json::Value;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Long-lived WebSocket transport
pub struct WebSocketTransport {
    sink: Mutex<WsSink>,
}

impl WebSocketTransport {
    /// Connect to `url` and start the read loop
    pub async fn connect(
        url: &str,
        protocols: &[String],
        headers: &HashMap<String, String>,
    ) -> Result<TransportHandle> {
        let mut request = url
            .into_client_request()
            .map_err(|e| McpError::Transport(format!("Invalid WebSocket URL '{}': {}", url, e)))?;

        if !protocols.is_empty() {
            let value = protocols.join(", ").parse().map_err(|_| {
                McpError::transport("Invalid WebSocket subprotocol list")
            })?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", value);
        }
        for (name, value) in headers {
            let name: tokio_tungstenite::tungstenite::http::HeaderName = name
                .parse()
                .map_err(|_| McpError::Transport(format!("Invalid header name '{}'", name)))?;
            let value = value
                .parse()
                .map_err(|_| McpError::Transport(format!("Invalid header value for '{}'", name)))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| McpError::Transport(format!("WebSocket connect failed: {}", e)))?;

        debug!(url = %url, "WebSocket transport connected");

        let (sink, mut read) = stream.split();
        let (incoming_tx, incoming) = mpsc::channel(INCOMING_BUFFER);

        let endpoint = url.to_string();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(message) => {
                            if incoming_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(url = %endpoint, error = %e, "Dropping unparseable frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!(url = %endpoint, "WebSocket closed by server");
                        break;
                    }
                    // Pings are answered by tungstenite's read path on flush;
                    // other frame kinds carry no protocol messages.
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %endpoint, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(TransportHandle {
            transport: Box::new(Self {
                sink: Mutex::new(sink),
            }),
            incoming,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| McpError::Transport(format!("WebSocket send failed: {}", e)))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "WebSocket already closed");
        }
        let _ = sink.close().await;
    }
}
