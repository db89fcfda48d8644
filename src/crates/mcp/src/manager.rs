//! Tool-server lifecycle manager
//!
//! Owns the registry of tool servers and, per server, its transport and
//! protocol client. Lifecycle: register → connect → discover → call →
//! disconnect → unregister. `error` is sticky and cleared only by a new
//! connect; disconnect keeps the cached tool catalog for diagnostics.

use crate::client::{ClientEvent, ProtocolClient};
use crate::persistence::ServerStore;
use crate::protocol::{methods, PROTOCOL_VERSION};
use crate::transport::{DefaultTransportFactory, TransportConfig, TransportFactory};
use crate::types::{RegisteredServer, ServerInfo, ServerStatus, ToolCallResult, ToolDefinition};
use crate::{McpError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// Manager configuration
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Per-request deadline
    pub request_timeout: Duration,

    /// Deadline for the `initialize` handshake
    pub connect_timeout: Duration,

    /// Client name sent in the handshake
    pub client_name: String,

    /// Client version sent in the handshake
    pub client_version: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            client_name: "strand".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl McpConfig {
    /// Defaults overridden from `STRAND_RPC_TIMEOUT_SECS` and
    /// `STRAND_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(Some(secs)) = tooling::config::get_env_parse::<u64>("STRAND_RPC_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(Some(secs)) = tooling::config::get_env_parse::<u64>("STRAND_CONNECT_TIMEOUT_SECS")
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Registration request
#[derive(Debug, Clone)]
pub struct RegisterServer {
    /// Owning tenant
    pub tenant_id: String,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// How to reach the server
    pub transport: TransportConfig,
    /// Connect immediately after registering
    pub auto_connect: bool,
}

/// A notification forwarded to manager subscribers (everything except the
/// `*_changed` family, which the manager consumes itself)
#[derive(Debug, Clone)]
pub struct ServerNotification {
    /// Originating server
    pub server_id: String,
    /// Notification method
    pub method: String,
    /// Notification parameters
    pub params: Option<Value>,
}

struct ServerConnection {
    client: Arc<ProtocolClient>,
    prompts: Vec<Value>,
    resources: Vec<Value>,
}

struct ServerEntry {
    record: RegisteredServer,
    connection: Option<ServerConnection>,
}

type ServerMap = Arc<RwLock<HashMap<String, ServerEntry>>>;

/// Connection manager for registered tool servers
pub struct McpManager {
    servers: ServerMap,
    store: Arc<dyn ServerStore>,
    factory: Arc<dyn TransportFactory>,
    notifications: broadcast::Sender<ServerNotification>,
    config: McpConfig,
}

impl McpManager {
    /// Create a manager over the real transports
    pub fn new(store: Arc<dyn ServerStore>, config: McpConfig) -> Self {
        Self::with_transport_factory(store, config, Arc::new(DefaultTransportFactory))
    }

    /// Create a manager with a custom transport factory (tests)
    pub fn with_transport_factory(
        store: Arc<dyn ServerStore>,
        config: McpConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            store,
            factory,
            notifications,
            config,
        }
    }

    /// Subscribe to non-lifecycle server notifications
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Register a new server.
    ///
    /// The record is persisted in the `disconnected` state. With
    /// `auto_connect`, a connect is attempted immediately; a failed connect
    /// leaves the server registered in the `error` state.
    pub async fn register(&self, spec: RegisterServer) -> Result<RegisteredServer> {
        let mut record = RegisteredServer::new(spec.tenant_id, spec.name, spec.transport);
        record.description = spec.description;

        self.store
            .save_server(&record)
            .await
            .map_err(|e| McpError::Persistence(e.to_string()))?;

        info!(server_id = %record.id, name = %record.name, transport = record.transport.kind(), "Registered tool server");

        self.servers.write().await.insert(
            record.id.clone(),
            ServerEntry {
                record: record.clone(),
                connection: None,
            },
        );

        if spec.auto_connect {
            if let Err(e) = self.connect(&record.id).await {
                warn!(server_id = %record.id, error = %e, "Auto-connect failed");
            }
            if let Some(current) = self.get_server(&record.id).await {
                return Ok(current);
            }
        }

        Ok(record)
    }

    /// Connect a registered server: transport, `initialize` handshake,
    /// `initialized` notification, `tools/list` cache population.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        let (transport_config, previous) = {
            let mut servers = self.servers.write().await;
            let entry = servers
                .get_mut(server_id)
                .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
            let previous = entry.connection.take();
            entry.record.status = ServerStatus::Connecting;
            entry.record.error = None;
            entry.record.updated_at = Utc::now().timestamp();
            (entry.record.transport.clone(), previous)
        };

        if let Some(connection) = previous {
            connection.client.close().await;
        }
        self.persist_status(server_id, ServerStatus::Connecting, None)
            .await;

        match self.establish(server_id, &transport_config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                {
                    let mut servers = self.servers.write().await;
                    if let Some(entry) = servers.get_mut(server_id) {
                        entry.record.status = ServerStatus::Error;
                        entry.record.error = Some(message.clone());
                        entry.record.updated_at = Utc::now().timestamp();
                        entry.connection = None;
                    }
                }
                self.persist_status(server_id, ServerStatus::Error, Some(message))
                    .await;
                Err(e)
            }
        }
    }

    async fn establish(&self, server_id: &str, transport: &TransportConfig) -> Result<()> {
        debug!(server_id, kind = transport.kind(), "Connecting transport");
        let handle = self.factory.connect(transport).await?;
        let (client, events) = ProtocolClient::new(handle, self.config.request_timeout);

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            },
            "capabilities": {"tools": {}, "prompts": {}, "resources": {}},
        });

        let init = match client
            .request_with_timeout(methods::INITIALIZE, Some(params), self.config.connect_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        let server_info = ServerInfo::from_initialize_result(&init);

        if let Err(e) = client.notify(methods::INITIALIZED, None).await {
            client.close().await;
            return Err(e);
        }

        let tools = match client.request(methods::TOOLS_LIST, None).await {
            Ok(result) => parse_tools(&result)?,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        let record = {
            let mut servers = self.servers.write().await;
            let entry = match servers.get_mut(server_id) {
                Some(entry) => entry,
                None => {
                    // Unregistered while the handshake was in flight.
                    client.close().await;
                    return Err(McpError::ServerNotFound(server_id.to_string()));
                }
            };
            let now = Utc::now().timestamp();
            entry.record.status = ServerStatus::Connected;
            entry.record.server_info = Some(server_info);
            entry.record.tools = tools;
            entry.record.error = None;
            entry.record.connected_at = Some(now);
            entry.record.updated_at = now;
            entry.connection = Some(ServerConnection {
                client: Arc::clone(&client),
                prompts: Vec::new(),
                resources: Vec::new(),
            });
            entry.record.clone()
        };

        if let Err(e) = self.store.save_server(&record).await {
            warn!(server_id, error = %e, "Failed to persist connected server");
        }

        info!(
            server_id,
            server = %record.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
            tools = record.tools.len(),
            "Tool server connected"
        );

        tokio::spawn(watch_events(
            server_id.to_string(),
            client,
            events,
            Arc::clone(&self.servers),
            Arc::clone(&self.store),
            self.notifications.clone(),
        ));

        Ok(())
    }

    /// Disconnect a server, rejecting its pending requests.
    ///
    /// The registration and the cached tool catalog survive; a sticky
    /// `error` status is left in place.
    pub async fn disconnect(&self, server_id: &str) -> Result<()> {
        let connection = {
            let mut servers = self.servers.write().await;
            let entry = servers
                .get_mut(server_id)
                .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
            let connection = entry.connection.take();
            if matches!(
                entry.record.status,
                ServerStatus::Connected | ServerStatus::Connecting
            ) {
                entry.record.status = ServerStatus::Disconnected;
                entry.record.connected_at = None;
                entry.record.updated_at = Utc::now().timestamp();
            }
            connection
        };

        if let Some(connection) = connection {
            let _ = connection.client.notify(methods::SHUTDOWN, None).await;
            connection.client.close().await;
        }

        self.persist_status(server_id, ServerStatus::Disconnected, None)
            .await;
        info!(server_id, "Tool server disconnected");
        Ok(())
    }

    /// Disconnect and remove a server registration
    pub async fn unregister(&self, server_id: &str) -> Result<()> {
        self.disconnect(server_id).await?;
        self.servers.write().await.remove(server_id);
        self.store
            .delete_server(server_id)
            .await
            .map_err(|e| McpError::Persistence(e.to_string()))?;
        info!(server_id, "Tool server unregistered");
        Ok(())
    }

    /// Call a tool on a connected server
    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let client = self.connected_client(server_id).await?;
        let result = client
            .request(
                methods::TOOLS_CALL,
                Some(json!({"name": name, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Find the first connected server advertising `name`.
    ///
    /// Servers are scanned ordered by (registration time, id), so the
    /// tie-break among servers advertising the same tool is deterministic.
    pub async fn find_tool(
        &self,
        name: &str,
        tenant_id: Option<&str>,
    ) -> Option<(String, ToolDefinition)> {
        let servers = self.servers.read().await;
        let mut candidates: Vec<&ServerEntry> = servers
            .values()
            .filter(|entry| entry.record.is_connected())
            .filter(|entry| tenant_id.map_or(true, |t| entry.record.tenant_id == t))
            .collect();
        candidates.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        for entry in candidates {
            if let Some(tool) = entry.record.tools.iter().find(|t| t.name == name) {
                return Some((entry.record.id.clone(), tool.clone()));
            }
        }
        None
    }

    /// Liveness check against a connected server
    pub async fn ping(&self, server_id: &str) -> Result<()> {
        let client = self.connected_client(server_id).await?;
        client.request(methods::PING, None).await?;
        Ok(())
    }

    /// Snapshot of one registration
    pub async fn get_server(&self, server_id: &str) -> Option<RegisteredServer> {
        self.servers
            .read()
            .await
            .get(server_id)
            .map(|entry| entry.record.clone())
    }

    /// Snapshots of all registrations, optionally filtered by tenant
    pub async fn list_servers(&self, tenant_id: Option<&str>) -> Vec<RegisteredServer> {
        let servers = self.servers.read().await;
        let mut records: Vec<RegisteredServer> = servers
            .values()
            .map(|entry| entry.record.clone())
            .filter(|record| tenant_id.map_or(true, |t| record.tenant_id == t))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Cached tool catalog of one server
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDefinition>> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        Ok(entry.record.tools.clone())
    }

    /// List prompts, refreshing the prompt cache
    pub async fn list_prompts(&self, server_id: &str) -> Result<Vec<Value>> {
        let client = self.connected_client(server_id).await?;
        let result = client.request(methods::PROMPTS_LIST, None).await?;
        let prompts = list_field(&result, "prompts");

        let mut servers = self.servers.write().await;
        if let Some(connection) = servers
            .get_mut(server_id)
            .and_then(|entry| entry.connection.as_mut())
        {
            connection.prompts = prompts.clone();
        }
        Ok(prompts)
    }

    /// Fetch one prompt
    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value> {
        let client = self.connected_client(server_id).await?;
        let mut params = json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        client.request(methods::PROMPTS_GET, Some(params)).await
    }

    /// List resources, refreshing the resource cache
    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<Value>> {
        let client = self.connected_client(server_id).await?;
        let result = client.request(methods::RESOURCES_LIST, None).await?;
        let resources = list_field(&result, "resources");

        let mut servers = self.servers.write().await;
        if let Some(connection) = servers
            .get_mut(server_id)
            .and_then(|entry| entry.connection.as_mut())
        {
            connection.resources = resources.clone();
        }
        Ok(resources)
    }

    /// Read one resource by uri
    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<Value> {
        let client = self.connected_client(server_id).await?;
        client
            .request(methods::RESOURCES_READ, Some(json!({"uri": uri})))
            .await
    }

    /// Cached prompt catalog, filled by [`list_prompts`](Self::list_prompts)
    /// and the `prompts/list_changed` refresh
    pub async fn cached_prompts(&self, server_id: &str) -> Result<Vec<Value>> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        Ok(entry
            .connection
            .as_ref()
            .map(|connection| connection.prompts.clone())
            .unwrap_or_default())
    }

    /// Cached resource catalog, filled by
    /// [`list_resources`](Self::list_resources) and the
    /// `resources/list_changed` refresh
    pub async fn cached_resources(&self, server_id: &str) -> Result<Vec<Value>> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        Ok(entry
            .connection
            .as_ref()
            .map(|connection| connection.resources.clone())
            .unwrap_or_default())
    }

    /// Load persisted registrations and reconnect, in the background, every
    /// server that was connected when the process last stopped.
    ///
    /// Reconnect failures leave the server in `error`; they never fail
    /// process start. Takes an owned handle because the reconnect tasks
    /// outlive the call: `Arc::clone(&manager).restore().await`.
    pub async fn restore(self: Arc<Self>) -> Result<()> {
        let records = self
            .store
            .load_servers()
            .await
            .map_err(|e| McpError::Persistence(e.to_string()))?;

        let mut reconnect = Vec::new();
        {
            let mut servers = self.servers.write().await;
            for mut record in records {
                if record.status == ServerStatus::Connected {
                    reconnect.push(record.id.clone());
                }
                if matches!(
                    record.status,
                    ServerStatus::Connected | ServerStatus::Connecting
                ) {
                    record.status = ServerStatus::Disconnected;
                    record.connected_at = None;
                }
                servers.insert(
                    record.id.clone(),
                    ServerEntry {
                        record,
                        connection: None,
                    },
                );
            }
        }

        info!(reconnecting = reconnect.len(), "Restored server registrations");

        for server_id in reconnect {
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = manager.connect(&server_id).await {
                    warn!(server_id = %server_id, error = %e, "Startup reconnect failed");
                }
            });
        }
        Ok(())
    }

    async fn connected_client(&self, server_id: &str) -> Result<Arc<ProtocolClient>> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        if !entry.record.is_connected() {
            return Err(McpError::NotConnected(server_id.to_string()));
        }
        entry
            .connection
            .as_ref()
            .map(|connection| Arc::clone(&connection.client))
            .ok_or_else(|| McpError::NotConnected(server_id.to_string()))
    }

    async fn persist_status(&self, server_id: &str, status: ServerStatus, error: Option<String>) {
        if let Err(e) = self.store.update_server_status(server_id, status, error).await {
            warn!(server_id, status = %status, error = %e, "Failed to persist server status");
        }
    }
}

fn parse_tools(result: &Value) -> Result<Vec<ToolDefinition>> {
    let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(tools)?)
}

fn list_field(result: &Value, field: &str) -> Vec<Value> {
    result
        .get(field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Consumes one connection's event stream: refreshes capability caches on
/// `*_changed` notifications, forwards the rest, and transitions the server
/// to `disconnected` when the transport closes.
async fn watch_events(
    server_id: String,
    client: Arc<ProtocolClient>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    servers: ServerMap,
    store: Arc<dyn ServerStore>,
    notifications: broadcast::Sender<ServerNotification>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Notification { method, params } => match method.as_str() {
                methods::TOOLS_LIST_CHANGED => {
                    refresh_tools(&server_id, &client, &servers, &store).await;
                }
                methods::PROMPTS_LIST_CHANGED => {
                    refresh_list(&server_id, &client, &servers, methods::PROMPTS_LIST, "prompts")
                        .await;
                }
                methods::RESOURCES_LIST_CHANGED => {
                    refresh_list(
                        &server_id,
                        &client,
                        &servers,
                        methods::RESOURCES_LIST,
                        "resources",
                    )
                    .await;
                }
                _ => {
                    // Dropped when nobody is subscribed.
                    let _ = notifications.send(ServerNotification {
                        server_id: server_id.clone(),
                        method,
                        params,
                    });
                }
            },
            ClientEvent::Closed => {
                let persist = {
                    let mut map = servers.write().await;
                    match map.get_mut(&server_id) {
                        Some(entry) if is_current(entry, &client) => {
                            entry.connection = None;
                            if matches!(
                                entry.record.status,
                                ServerStatus::Connected | ServerStatus::Connecting
                            ) {
                                entry.record.status = ServerStatus::Disconnected;
                                entry.record.connected_at = None;
                                entry.record.updated_at = Utc::now().timestamp();
                                true
                            } else {
                                false
                            }
                        }
                        _ => false,
                    }
                };
                if persist {
                    warn!(server_id = %server_id, "Tool server connection lost");
                    if let Err(e) = store
                        .update_server_status(&server_id, ServerStatus::Disconnected, None)
                        .await
                    {
                        warn!(server_id = %server_id, error = %e, "Failed to persist disconnect");
                    }
                }
                break;
            }
        }
    }
}

fn is_current(entry: &ServerEntry, client: &Arc<ProtocolClient>) -> bool {
    entry
        .connection
        .as_ref()
        .map(|connection| Arc::ptr_eq(&connection.client, client))
        .unwrap_or(false)
}

async fn refresh_tools(
    server_id: &str,
    client: &Arc<ProtocolClient>,
    servers: &ServerMap,
    store: &Arc<dyn ServerStore>,
) {
    debug!(server_id, "Refreshing tool catalog");
    let tools = match client.request(methods::TOOLS_LIST, None).await {
        Ok(result) => match parse_tools(&result) {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server_id, error = %e, "Invalid tools/list response");
                return;
            }
        },
        Err(e) => {
            warn!(server_id, error = %e, "Tool refresh failed");
            return;
        }
    };

    let record = {
        let mut map = servers.write().await;
        match map.get_mut(server_id) {
            Some(entry) if is_current(entry, client) => {
                entry.record.tools = tools;
                entry.record.updated_at = Utc::now().timestamp();
                Some(entry.record.clone())
            }
            _ => None,
        }
    };

    if let Some(record) = record {
        if let Err(e) = store.save_server(&record).await {
            warn!(server_id, error = %e, "Failed to persist refreshed tools");
        }
    }
}

async fn refresh_list(
    server_id: &str,
    client: &Arc<ProtocolClient>,
    servers: &ServerMap,
    method: &str,
    field: &str,
) {
    debug!(server_id, method, "Refreshing capability cache");
    let items = match client.request(method, None).await {
        Ok(result) => list_field(&result, field),
        Err(e) => {
            warn!(server_id, method, error = %e, "Capability refresh failed");
            return;
        }
    };

    let mut map = servers.write().await;
    if let Some(entry) = map.get_mut(server_id) {
        if is_current(entry, client) {
            if let Some(connection) = entry.connection.as_mut() {
                match field {
                    "prompts" => connection.prompts = items,
                    "resources" => connection.resources = items,
                    _ => {}
                }
            }
        }
    }
}
