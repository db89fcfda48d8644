//! MCP node executor
//!
//! Resolves the arguments map, then calls a tool either on an explicitly
//! named server or on the first connected server advertising the tool
//! name. The tool-call response is the node output verbatim. One attempt;
//! callers wanting retry configure `retries` on the node.

use super::{NodeExecutor, NodeOutput};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::{McpNodeConfig, Node, NodeKind};
use crate::resolver;
use async_trait::async_trait;
use mcp::McpManager;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Executor for `mcp` nodes
pub struct McpExecutor {
    manager: Arc<McpManager>,
}

impl McpExecutor {
    /// Create an executor against the connection manager
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl NodeExecutor for McpExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Mcp
    }

    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        let config: McpNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?;

        let arguments = resolver::resolve_value(&Value::Object(config.arguments), context);

        let server_id = match config.server_id {
            Some(server_id) => server_id,
            None => {
                let (server_id, _) = self
                    .manager
                    .find_tool(&config.tool, Some(&context.tenant_id))
                    .await
                    .ok_or_else(|| {
                        EngineError::Execution(format!(
                            "No connected server provides tool '{}'",
                            config.tool
                        ))
                    })?;
                server_id
            }
        };

        debug!(node_id = %node.id, server_id = %server_id, tool = %config.tool, "Calling tool");
        let result = self
            .manager
            .call_tool(&server_id, &config.tool, arguments)
            .await?;

        Ok(NodeOutput::new(serde_json::to_value(&result)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp::manager::{McpConfig, RegisterServer};
    use mcp::testing::{MemoryServerStore, StubServer, StubServerFactory};
    use mcp::TransportConfig;
    use serde_json::json;

    async fn connected_manager(stub: Arc<StubServer>) -> (Arc<McpManager>, String) {
        let manager = Arc::new(McpManager::with_transport_factory(
            MemoryServerStore::new(),
            McpConfig::default(),
            Arc::new(StubServerFactory(stub)),
        ));
        let server = manager
            .register(RegisterServer {
                tenant_id: "tenant-1".to_string(),
                name: "files".to_string(),
                description: None,
                transport: TransportConfig::Stdio {
                    command: "stub".to_string(),
                    args: Vec::new(),
                    env: Default::default(),
                },
                auto_connect: true,
            })
            .await
            .unwrap();
        (manager, server.id)
    }

    fn mcp_node(config: Value) -> Node {
        serde_json::from_value(json!({
            "id": "m",
            "type": "mcp",
            "config": config,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_explicit_server_call() {
        let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
        let (manager, server_id) = connected_manager(stub).await;
        let executor = McpExecutor::new(manager);

        let mut context = Context::new("run-1", "tenant-1");
        context.set_output("prep", json!({"path": "/tmp/data"}));

        let node = mcp_node(json!({
            "serverId": server_id,
            "tool": "read_file",
            "arguments": {"path": "${outputs.prep.path}"}
        }));

        let output = executor.execute(&node, &context).await.unwrap();
        assert_eq!(output.output["isError"], false);
        assert_eq!(output.output["content"][0]["text"], "ran read_file");
    }

    #[tokio::test]
    async fn test_auto_discovery_by_tool_name() {
        let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
        let (manager, _server_id) = connected_manager(stub).await;
        let executor = McpExecutor::new(manager);

        let context = Context::new("run-1", "tenant-1");
        let node = mcp_node(json!({"tool": "read_file", "arguments": {}}));

        let output = executor.execute(&node, &context).await.unwrap();
        assert_eq!(output.output["isError"], false);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_discovery() {
        let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
        let (manager, _server_id) = connected_manager(stub).await;
        let executor = McpExecutor::new(manager);

        let context = Context::new("run-1", "tenant-1");
        let node = mcp_node(json!({"tool": "missing_tool", "arguments": {}}));

        let error = executor.execute(&node, &context).await.unwrap_err();
        assert!(error.to_string().contains("missing_tool"));
    }

    #[tokio::test]
    async fn test_tenant_mismatch_blocks_discovery() {
        let stub = StubServer::new("files", vec![StubServer::tool("read_file")]);
        let (manager, _server_id) = connected_manager(stub).await;
        let executor = McpExecutor::new(manager);

        let context = Context::new("run-1", "other-tenant");
        let node = mcp_node(json!({"tool": "read_file", "arguments": {}}));

        assert!(executor.execute(&node, &context).await.is_err());
    }
}
