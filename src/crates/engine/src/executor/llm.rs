//! LLM node executor
//!
//! Resolves templates inside every message, issues one completion request
//! to the gateway, and returns the response verbatim as the node output.
//! Transport and model errors both retry; three attempts by default.

use super::{NodeExecutor, NodeOutput};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::{LlmNodeConfig, Node, NodeKind};
use crate::resolver;
use async_trait::async_trait;
use llm::{ChatMessage, ChatModel, ChatRequest};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Executor for `llm` nodes
pub struct LlmExecutor {
    model: Arc<dyn ChatModel>,
}

impl LlmExecutor {
    /// Create an executor against a chat-completion collaborator
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Llm
    }

    fn max_attempts(&self) -> u32 {
        3
    }

    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        let config: LlmNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?;

        let messages: Vec<ChatMessage> = config
            .messages
            .iter()
            .map(|message| ChatMessage {
                role: message.role.clone(),
                content: resolver::resolve_str(&message.content, context),
            })
            .collect();

        let mut request = ChatRequest::new(&config.model, messages);
        if let Some(temperature) = config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(tools) = config.tools.clone() {
            request = request.with_tools(tools);
        }

        debug!(node_id = %node.id, model = %config.model, "Requesting completion");
        let response = self.model.complete(request).await?;

        let metadata = json!({
            "model": response.model,
            "finishReason": response.finish_reason,
            "usage": response.usage,
        });
        Ok(NodeOutput::new(serde_json::to_value(&response)?).with_metadata(metadata))
    }
}
