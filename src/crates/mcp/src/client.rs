//! JSON-RPC protocol client
//!
//! Sits on top of a [`Transport`] and provides correlated request/response
//! semantics plus notification delivery. Every outgoing request completes
//! exactly once: with its response, with a timeout, or with a
//! connection-closed error.

use crate::protocol::{
    self, error_codes, methods, IncomingMessage, JsonRpcNotification, JsonRpcRequest, RpcError,
};
use crate::transport::{Transport, TransportHandle};
use crate::{McpError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tooling::pending::PendingMap;
use tracing::{debug, warn};

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Events surfaced to the client's owner
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A server notification (requests the client serves are answered
    /// internally and never surfaced)
    Notification {
        /// Notification method
        method: String,
        /// Notification parameters
        params: Option<Value>,
    },
    /// The transport closed; all pending requests have been rejected
    Closed,
}

/// Completion value delivered through the pending table
#[derive(Debug)]
enum PendingOutcome {
    Result(Value),
    Error(RpcError),
    Closed,
}

/// Correlating JSON-RPC client over one connection
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    pending: PendingMap<PendingOutcome>,
    next_id: AtomicU64,
    default_timeout: Duration,
}

impl ProtocolClient {
    /// Wrap an established transport.
    ///
    /// Returns the client and the event stream carrying notifications and
    /// the final `Closed` event. The dispatch task runs until the
    /// transport's incoming channel ends.
    pub fn new(
        handle: TransportHandle,
        default_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let TransportHandle {
            transport,
            incoming,
        } = handle;
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let client = Arc::new(Self {
            transport: Arc::clone(&transport),
            pending: PendingMap::new(),
            next_id: AtomicU64::new(1),
            default_timeout,
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // The dispatch task captures only what it needs, so dropping the
        // client drops the transport and ends the task.
        tokio::spawn(dispatch(
            incoming,
            client.pending.clone(),
            transport,
            event_tx,
        ));

        (client, event_rx)
    }

    /// Send a request and wait for its correlated response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Send a request with an explicit deadline
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = id.to_string();
        let rx = self
            .pending
            .register(&key)
            .ok_or_else(|| McpError::transport("Duplicate request id"))?;

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.transport.send(serde_json::to_value(&request)?).await {
            self.pending.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(PendingOutcome::Result(value))) => Ok(value),
            Ok(Ok(PendingOutcome::Error(error))) => Err(error.into()),
            Ok(Ok(PendingOutcome::Closed)) | Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.remove(&key);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Send a notification (no reply expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(serde_json::to_value(&notification)?).await
    }

    /// Close the connection, rejecting every outstanding request
    pub async fn close(&self) {
        self.transport.close().await;
        // The dispatch task also drains on stream end; doing it here makes
        // close deterministic even when the transport lingers.
        self.pending.resolve_all_with(|_| PendingOutcome::Closed);
    }

    /// Number of outstanding requests
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Routes incoming messages until the connection ends.
async fn dispatch(
    mut incoming: mpsc::Receiver<Value>,
    pending: PendingMap<PendingOutcome>,
    transport: Arc<dyn Transport>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    while let Some(message) = incoming.recv().await {
        match protocol::parse_incoming(&message) {
            Ok(IncomingMessage::Response { id, result, error }) => {
                let outcome = match error {
                    Some(error) => PendingOutcome::Error(error),
                    None => PendingOutcome::Result(result.unwrap_or(Value::Null)),
                };
                if !pending.resolve(&id, outcome) {
                    debug!(id = %id, "Dropping response with unknown id");
                }
            }
            Ok(IncomingMessage::Request { id, method, .. }) => {
                // This client serves no methods beyond liveness.
                let reply = if method == methods::PING {
                    serde_json::json!({
                        "jsonrpc": protocol::JSONRPC_VERSION,
                        "id": id,
                        "result": {}
                    })
                } else {
                    protocol::error_response(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("Method '{}' not found", method),
                    )
                };
                if let Err(e) = transport.send(reply).await {
                    warn!(error = %e, "Failed to answer server request");
                }
            }
            Ok(IncomingMessage::Notification { method, params }) => {
                // Dropped when the owner unsubscribed.
                let _ = event_tx.send(ClientEvent::Notification { method, params });
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
            }
        }
    }

    debug!("Transport closed, rejecting outstanding requests");
    pending.resolve_all_with(|_| PendingOutcome::Closed);
    let _ = event_tx.send(ClientEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::loopback;
    use serde_json::json;

    #[tokio::test]
    async fn test_concurrent_requests_correlate_out_of_order() {
        let (handle, mut server) = loopback();
        let (client, _events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request(methods::TOOLS_CALL, Some(json!({"name": "first"})))
                    .await
            })
        };
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request(methods::TOOLS_CALL, Some(json!({"name": "second"})))
                    .await
            })
        };

        let request_a = server.from_client.recv().await.unwrap();
        let request_b = server.from_client.recv().await.unwrap();

        // Reply in reverse order; each caller must still see its own reply.
        for request in [&request_b, &request_a] {
            let id = request["id"].clone();
            let name = request["params"]["name"].as_str().unwrap();
            server
                .to_client
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"echo": name}
                }))
                .await
                .unwrap();
        }

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first["echo"], "first");
        assert_eq!(second["echo"], "second");
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out_and_connection_stays_usable() {
        let (handle, mut server) = loopback();
        let (client, _events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        let result = client
            .request_with_timeout("tools/call", None, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(McpError::Timeout { .. })));
        assert_eq!(client.pending_requests(), 0);

        // Drain the timed-out request the server never answered.
        let _ = server.from_client.recv().await.unwrap();

        // A later request on the same connection still completes.
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(methods::PING, None).await })
        };
        let request = server.from_client.recv().await.unwrap();
        server
            .to_client
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}))
            .await
            .unwrap();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_response_rejects_with_protocol_error() {
        let (handle, mut server) = loopback();
        let (client, _events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(methods::TOOLS_CALL, None).await })
        };

        let request = server.from_client.recv().await.unwrap();
        server
            .to_client
            .send(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32001, "message": "tool not found"}
            }))
            .await
            .unwrap();

        match pending.await.unwrap() {
            Err(McpError::Protocol { code, message, .. }) => {
                assert_eq!(code, error_codes::TOOL_NOT_FOUND);
                assert_eq!(message, "tool not found");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_close_rejects_outstanding_requests() {
        let (handle, server) = loopback();
        let (client, mut events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(methods::TOOLS_CALL, None).await })
        };

        // Give the request a moment to register, then drop the server end.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(server);

        assert!(matches!(
            pending.await.unwrap(),
            Err(McpError::ConnectionClosed)
        ));
        assert_eq!(client.pending_requests(), 0);

        // The Closed event is the last thing on the stream.
        loop {
            match events.recv().await {
                Some(ClientEvent::Closed) => break,
                Some(_) => continue,
                None => panic!("event stream ended without Closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_dropped() {
        let (handle, server) = loopback();
        let (client, _events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        server
            .to_client
            .send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_notifications_reach_subscriber() {
        let (handle, server) = loopback();
        let (_client, mut events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        server
            .to_client
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/tools/list_changed"
            }))
            .await
            .unwrap();

        match events.recv().await {
            Some(ClientEvent::Notification { method, .. }) => {
                assert_eq!(method, methods::TOOLS_LIST_CHANGED);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let (handle, mut server) = loopback();
        let (_client, _events) = ProtocolClient::new(handle, DEFAULT_REQUEST_TIMEOUT);

        server
            .to_client
            .send(json!({"jsonrpc": "2.0", "id": 41, "method": "ping"}))
            .await
            .unwrap();

        let reply = server.from_client.recv().await.unwrap();
        assert_eq!(reply["id"], 41);
        assert!(reply["result"].is_object());
    }
}
