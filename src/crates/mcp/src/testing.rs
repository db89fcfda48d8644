//! In-memory doubles for tests
//!
//! A loopback transport pair, a scripted tool server behind a
//! [`TransportFactory`], and an in-memory [`ServerStore`]. Used by this
//! crate's own tests and by downstream crates exercising the manager
//! without real processes or sockets.

use crate::persistence::ServerStore;
use crate::protocol::{methods, JSONRPC_VERSION};
use crate::transport::{Transport, TransportConfig, TransportFactory, TransportHandle};
use crate::types::{RegisteredServer, ServerStatus, ToolDefinition};
use crate::{McpError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Server-side endpoints of a [`loopback`] transport pair
pub struct ServerEnd {
    /// Messages the client sent
    pub from_client: mpsc::UnboundedReceiver<Value>,
    /// Channel for injecting messages to the client
    pub to_client: mpsc::Sender<Value>,
}

struct LoopbackTransport {
    to_server: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let sender = self.to_server.lock().clone().ok_or(McpError::ConnectionClosed)?;
        sender
            .send(message)
            .map_err(|_| McpError::ConnectionClosed)
    }

    async fn close(&self) {
        self.to_server.lock().take();
    }
}

/// Create an in-memory transport pair: the client handle and the server end
pub fn loopback() -> (TransportHandle, ServerEnd) {
    let (to_server_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, incoming) = mpsc::channel(64);

    let handle = TransportHandle {
        transport: Box::new(LoopbackTransport {
            to_server: Mutex::new(Some(to_server_tx)),
        }),
        incoming,
    };

    (
        handle,
        ServerEnd {
            from_client,
            to_client,
        },
    )
}

/// A scripted tool server reachable through any [`TransportConfig`].
///
/// Answers the lifecycle handshake, `tools/list`, `tools/call`, `ping`, and
/// the prompts/resources discovery methods from its current state. Tests
/// mutate the tool catalog and push `*_changed` notifications to exercise
/// cache refreshes.
pub struct StubServer {
    /// Name reported by the handshake
    pub name: String,
    tools: Mutex<Vec<ToolDefinition>>,
    fail_initialize: AtomicBool,
    connections: Mutex<Vec<StubConnection>>,
}

struct StubConnection {
    to_client: mpsc::Sender<Value>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl StubServer {
    /// Create a stub advertising the given tools
    pub fn new(name: impl Into<String>, tools: Vec<ToolDefinition>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tools: Mutex::new(tools),
            fail_initialize: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// A tool definition with just a name
    pub fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: None,
        }
    }

    /// Make subsequent connects fail during the handshake
    pub fn fail_next_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Replace the advertised tool catalog
    pub fn set_tools(&self, tools: Vec<ToolDefinition>) {
        *self.tools.lock() = tools;
    }

    /// Push a notification to every live connection
    pub async fn notify(&self, method: &str) {
        let senders: Vec<mpsc::Sender<Value>> = self
            .connections
            .lock()
            .iter()
            .map(|connection| connection.to_client.clone())
            .collect();
        for sender in senders {
            let _ = sender
                .send(json!({"jsonrpc": JSONRPC_VERSION, "method": method}))
                .await;
        }
    }

    /// Drop every live connection (simulates a server crash).
    ///
    /// Stops the responder tasks so the clients' incoming channels end.
    pub fn drop_connections(&self) {
        for connection in self.connections.lock().drain(..) {
            connection.shutdown.notify_one();
        }
    }

    fn respond(&self, request: &Value) -> Option<Value> {
        let id = request.get("id").filter(|id| !id.is_null())?.clone();
        let method = request.get("method")?.as_str()?;
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let body = match method {
            methods::INITIALIZE => {
                if self.fail_initialize.load(Ordering::SeqCst) {
                    return Some(json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": {"code": -32000, "message": "initialize refused"}
                    }));
                }
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": self.name, "version": "0.1.0"},
                    "capabilities": {"tools": {"listChanged": true}}
                })
            }
            methods::TOOLS_LIST => json!({"tools": *self.tools.lock()}),
            methods::TOOLS_CALL => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if self.tools.lock().iter().any(|t| t.name == name) {
                    json!({
                        "content": [{"type": "text", "text": format!("ran {}", name)}],
                        "isError": false
                    })
                } else {
                    return Some(json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": {"code": -32001, "message": format!("tool '{}' not found", name)}
                    }));
                }
            }
            methods::PING => json!({}),
            methods::PROMPTS_LIST => json!({"prompts": []}),
            methods::RESOURCES_LIST => json!({"resources": []}),
            methods::PROMPTS_GET => json!({"messages": []}),
            methods::RESOURCES_READ => json!({"contents": []}),
            _ => {
                return Some(json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": id,
                    "error": {"code": -32601, "message": format!("Method '{}' not found", method)}
                }))
            }
        };

        Some(json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": body}))
    }
}

/// Factory handing out connections to one [`StubServer`].
///
/// The responder task needs its own handle on the stub, so the factory
/// wraps the `Arc` rather than implementing the trait on the stub itself.
pub struct StubServerFactory(pub Arc<StubServer>);

#[async_trait]
impl TransportFactory for StubServerFactory {
    async fn connect(&self, _config: &TransportConfig) -> Result<TransportHandle> {
        let (handle, server_end) = loopback();
        let ServerEnd {
            mut from_client,
            to_client,
        } = server_end;

        let shutdown = Arc::new(tokio::sync::Notify::new());
        self.0.connections.lock().push(StubConnection {
            to_client: to_client.clone(),
            shutdown: Arc::clone(&shutdown),
        });

        let server = Arc::clone(&self.0);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = from_client.recv() => match maybe {
                        Some(request) => {
                            if let Some(reply) = server.respond(&request) {
                                if to_client.send(reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.notified() => break,
                }
            }
        });

        Ok(handle)
    }
}

/// In-memory [`ServerStore`]
#[derive(Default)]
pub struct MemoryServerStore {
    servers: Mutex<HashMap<String, RegisteredServer>>,
}

impl MemoryServerStore {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of one record
    pub fn get(&self, server_id: &str) -> Option<RegisteredServer> {
        self.servers.lock().get(server_id).cloned()
    }
}

#[async_trait]
impl ServerStore for MemoryServerStore {
    async fn save_server(&self, server: &RegisteredServer) -> Result<()> {
        self.servers
            .lock()
            .insert(server.id.clone(), server.clone());
        Ok(())
    }

    async fn update_server_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        error: Option<String>,
    ) -> Result<()> {
        if let Some(record) = self.servers.lock().get_mut(server_id) {
            record.status = status;
            record.error = error;
        }
        Ok(())
    }

    async fn load_servers(&self) -> Result<Vec<RegisteredServer>> {
        let mut servers: Vec<_> = self.servers.lock().values().cloned().collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(servers)
    }

    async fn delete_server(&self, server_id: &str) -> Result<()> {
        self.servers.lock().remove(server_id);
        Ok(())
    }
}
