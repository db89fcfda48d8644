//! Lifecycle tests for the connection manager against an in-memory stub
//! server.

use mcp::manager::{McpConfig, McpManager, RegisterServer};
use mcp::testing::{MemoryServerStore, StubServer, StubServerFactory};
use mcp::types::ServerStatus;
use mcp::McpError;
use mcp::TransportConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn stdio_config() -> TransportConfig {
    TransportConfig::Stdio {
        command: "stub-server".to_string(),
        args: Vec::new(),
        env: Default::default(),
    }
}

fn register_spec(name: &str) -> RegisterServer {
    RegisterServer {
        tenant_id: "tenant-1".to_string(),
        name: name.to_string(),
        description: None,
        transport: stdio_config(),
        auto_connect: false,
    }
}

fn manager_with(
    stub: &Arc<StubServer>,
) -> (Arc<McpManager>, Arc<MemoryServerStore>) {
    let store = MemoryServerStore::new();
    let manager = Arc::new(McpManager::with_transport_factory(
        store.clone(),
        McpConfig::default(),
        Arc::new(StubServerFactory(Arc::clone(stub))),
    ));
    (manager, store)
}

#[tokio::test]
async fn test_register_persists_disconnected_record() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    assert_eq!(server.status, ServerStatus::Disconnected);
    assert!(server.tools.is_empty());

    let persisted = store.get(&server.id).unwrap();
    assert_eq!(persisted.status, ServerStatus::Disconnected);
    assert_eq!(persisted.name, "files");
}

#[tokio::test]
async fn test_connect_populates_info_and_tools() {
    let stub = StubServer::new(
        "files",
        vec![StubServer::tool("read_file"), StubServer::tool("write_file")],
    );
    let (manager, store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    let connected = manager.get_server(&server.id).await.unwrap();
    assert_eq!(connected.status, ServerStatus::Connected);
    assert!(connected.connected_at.is_some());
    let info = connected.server_info.unwrap();
    assert_eq!(info.name, "files");
    assert_eq!(info.protocol_version, "2024-11-05");
    assert_eq!(connected.tools.len(), 2);

    let persisted = store.get(&server.id).unwrap();
    assert_eq!(persisted.status, ServerStatus::Connected);
    assert_eq!(persisted.tools.len(), 2);
}

#[tokio::test]
async fn test_auto_connect_on_register() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let mut spec = register_spec("files");
    spec.auto_connect = true;
    let server = manager.register(spec).await.unwrap();
    assert_eq!(server.status, ServerStatus::Connected);
    assert_eq!(server.tools.len(), 1);
}

#[tokio::test]
async fn test_call_tool_roundtrip() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    let result = manager
        .call_tool(&server.id, "read_file", json!({"path": "/tmp/a"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content[0]["text"], "ran read_file");
}

#[tokio::test]
async fn test_call_tool_unknown_name_surfaces_protocol_error() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    match manager.call_tool(&server.id, "no_such_tool", json!({})).await {
        Err(McpError::Protocol { code, .. }) => assert_eq!(code, -32001),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_call_tool_requires_connected_state() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    match manager.call_tool(&server.id, "read_file", json!({})).await {
        Err(McpError::NotConnected(id)) => assert_eq!(id, server.id),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_initialize_failure_lands_in_sticky_error_state() {
    let stub = StubServer::new("files", vec![]);
    stub.fail_next_initialize(true);
    let (manager, store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    assert!(manager.connect(&server.id).await.is_err());

    let errored = manager.get_server(&server.id).await.unwrap();
    assert_eq!(errored.status, ServerStatus::Error);
    assert!(errored.error.unwrap().contains("initialize refused"));
    assert_eq!(store.get(&server.id).unwrap().status, ServerStatus::Error);

    // A new connect clears the sticky error.
    stub.fail_next_initialize(false);
    manager.connect(&server.id).await.unwrap();
    let recovered = manager.get_server(&server.id).await.unwrap();
    assert_eq!(recovered.status, ServerStatus::Connected);
    assert!(recovered.error.is_none());
}

#[tokio::test]
async fn test_disconnect_keeps_cached_tools() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();
    manager.disconnect(&server.id).await.unwrap();

    let disconnected = manager.get_server(&server.id).await.unwrap();
    assert_eq!(disconnected.status, ServerStatus::Disconnected);
    assert!(disconnected.connected_at.is_none());
    // Catalog kept for diagnostics until the next connect repopulates it.
    assert_eq!(disconnected.tools.len(), 1);
}

#[tokio::test]
async fn test_unregister_removes_registration() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();
    manager.unregister(&server.id).await.unwrap();

    assert!(manager.get_server(&server.id).await.is_none());
    assert!(store.get(&server.id).is_none());
    assert!(matches!(
        manager.call_tool(&server.id, "read_file", json!({})).await,
        Err(McpError::ServerNotFound(_))
    ));
}

#[tokio::test]
async fn test_find_tool_prefers_earliest_registration() {
    let stub = StubServer::new("files", vec![StubServer::tool("shared_tool")]);
    let (manager, _store) = manager_with(&stub);

    let first = manager.register(register_spec("alpha")).await.unwrap();
    // created_at has second granularity; order falls back to id on ties,
    // so force distinct seconds off the table by registering both and
    // asserting determinism rather than a specific winner.
    let second = manager.register(register_spec("beta")).await.unwrap();
    manager.connect(&first.id).await.unwrap();
    manager.connect(&second.id).await.unwrap();

    let (winner_a, _) = manager.find_tool("shared_tool", None).await.unwrap();
    let (winner_b, _) = manager.find_tool("shared_tool", None).await.unwrap();
    assert_eq!(winner_a, winner_b);

    let expected = if (first.created_at, first.id.clone()) <= (second.created_at, second.id.clone())
    {
        first.id.clone()
    } else {
        second.id.clone()
    };
    assert_eq!(winner_a, expected);
}

#[tokio::test]
async fn test_find_tool_filters_by_tenant() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    assert!(manager.find_tool("read_file", Some("tenant-1")).await.is_some());
    assert!(manager.find_tool("read_file", Some("tenant-2")).await.is_none());
    assert!(manager.find_tool("missing", Some("tenant-1")).await.is_none());
}

#[tokio::test]
async fn test_tools_list_changed_refreshes_cache() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    stub.set_tools(vec![
        StubServer::tool("read_file"),
        StubServer::tool("delete_file"),
    ]);
    stub.notify("notifications/tools/list_changed").await;

    let manager_ref = &manager;
    let server_id = server.id.clone();
    for _ in 0..200 {
        let tools = manager_ref.list_tools(&server_id).await.unwrap();
        if tools.len() == 2 {
            assert!(tools.iter().any(|t| t.name == "delete_file"));
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tool cache was not refreshed");
}

#[tokio::test]
async fn test_connection_loss_transitions_to_disconnected() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    stub.drop_connections();

    for _ in 0..200 {
        let status = manager.get_server(&server.id).await.map(|s| s.status);
        if status == Some(ServerStatus::Disconnected) {
            assert_eq!(
                store.get(&server.id).unwrap().status,
                ServerStatus::Disconnected
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not transition to disconnected");
}

#[tokio::test]
async fn test_restore_reconnects_previously_connected_servers() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let store = MemoryServerStore::new();

    // Seed the store as if a prior process had a connected server.
    let mut record = mcp::RegisteredServer::new("tenant-1", "files", stdio_config());
    record.status = ServerStatus::Connected;
    use mcp::ServerStore;
    store.save_server(&record).await.unwrap();

    let manager = Arc::new(McpManager::with_transport_factory(
        store.clone(),
        McpConfig::default(),
        Arc::new(StubServerFactory(Arc::clone(&stub))),
    ));
    Arc::clone(&manager).restore().await.unwrap();

    for _ in 0..200 {
        if let Some(server) = manager.get_server(&record.id).await {
            if server.status == ServerStatus::Connected {
                assert_eq!(server.tools.len(), 1);
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server was not reconnected on restore");
}

#[tokio::test]
async fn test_ping_and_capability_passthrough() {
    let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
    let (manager, _store) = manager_with(&stub);

    let server = manager.register(register_spec("files")).await.unwrap();
    manager.connect(&server.id).await.unwrap();

    manager.ping(&server.id).await.unwrap();
    assert!(manager.list_prompts(&server.id).await.unwrap().is_empty());
    assert!(manager.list_resources(&server.id).await.unwrap().is_empty());
}
