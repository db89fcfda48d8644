//! Node executors
//!
//! One executor per node kind. The registry selects by kind and wraps each
//! execution in the shared retry loop (exponential backoff, `2^attempt`
//! seconds after failing attempt `attempt`, capped) and the per-attempt
//! node timeout. Executors never mutate the context; the scheduler records
//! outputs.

pub mod command;
pub mod human;
pub mod llm;
pub mod mcp;

pub use self::command::ToolExecutor;
pub use self::human::{ApprovalDecision, HumanExecutor};
pub use self::llm::LlmExecutor;
pub use self::mcp::McpExecutor;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::{Node, NodeKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tooling::async_utils::RetryPolicy;
use tracing::{debug, warn};

/// A successful node execution
#[derive(Debug, Clone)]
pub struct NodeOutput {
    /// The node's output value, stored into the context by the scheduler
    pub output: Value,

    /// Executor-specific metadata (token usage, durations, ...)
    pub metadata: Option<Value>,
}

impl NodeOutput {
    /// Output with no metadata
    pub fn new(output: Value) -> Self {
        Self {
            output,
            metadata: None,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Executes nodes of one kind
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The kind this executor serves
    fn kind(&self) -> NodeKind;

    /// Attempts per node, inclusive of the first
    fn max_attempts(&self) -> u32 {
        1
    }

    /// Whether the engine-wide per-attempt timeout applies.
    ///
    /// Human nodes opt out: their configured approval deadline governs.
    fn bounded_by_node_timeout(&self) -> bool {
        true
    }

    /// Execute one attempt
    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput>;
}

/// Registry of executors keyed by node kind, owning the retry wrapper
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
    config: EngineConfig,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new(config: EngineConfig) -> Self {
        Self {
            executors: HashMap::new(),
            config,
        }
    }

    /// Register an executor under its kind, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) -> &mut Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    /// Executor for a kind
    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Whether a kind has an executor
    pub fn supports(&self, kind: NodeKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Execute a node with retry and per-attempt timeout.
    ///
    /// `node.retries` overrides the executor's attempt count. On
    /// exhaustion the last error is returned; non-retryable errors
    /// short-circuit.
    pub async fn run_node(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        let executor = self
            .get(node.kind)
            .ok_or_else(|| EngineError::MissingExecutor(node.kind.to_string()))?;

        let max_attempts = node.retries.unwrap_or_else(|| executor.max_attempts()).max(1);
        let backoff = RetryPolicy::new(max_attempts).with_jitter(false);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(
                node_id = %node.id,
                kind = %node.kind,
                attempt,
                max_attempts,
                "Executing node"
            );

            let result = if executor.bounded_by_node_timeout() {
                match tokio::time::timeout(self.config.node_timeout, executor.execute(node, context))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(EngineError::Timeout {
                        node: node.id.clone(),
                        seconds: self.config.node_timeout.as_secs(),
                    }),
                }
            } else {
                executor.execute(node, context).await
            };

            match result {
                Ok(output) => {
                    if attempt > 1 {
                        debug!(node_id = %node.id, attempt, "Node succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    if attempt < max_attempts {
                        let delay = backoff.delay_after(attempt);
                        warn!(
                            node_id = %node.id,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Node attempt failed, retrying after backoff"
                        );
                        last_error = Some(error);
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            node_id = %node.id,
                            attempts = attempt,
                            error = %error,
                            "Node failed after all attempts"
                        );
                        last_error = Some(error);
                    }
                }
            }
        }

        Err(last_error.expect("at least one attempt was made"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyExecutor {
        kind: NodeKind,
        attempts: Arc<AtomicU32>,
        fail_first: u32,
        max_attempts: u32,
        slow: bool,
    }

    #[async_trait]
    impl NodeExecutor for FlakyExecutor {
        fn kind(&self) -> NodeKind {
            self.kind
        }

        fn max_attempts(&self) -> u32 {
            self.max_attempts
        }

        async fn execute(&self, _node: &Node, _context: &Context) -> Result<NodeOutput> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.slow {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if attempt <= self.fail_first {
                Err(EngineError::Execution(format!("attempt {} failed", attempt)))
            } else {
                Ok(NodeOutput::new(json!({"attempt": attempt})))
            }
        }
    }

    fn tool_node(id: &str) -> Node {
        serde_json::from_value(json!({
            "id": id,
            "type": "tool",
            "config": {"command": "true"},
        }))
        .unwrap()
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_node_timeout(Duration::from_millis(50))
    }

    fn registry_with(executor: FlakyExecutor) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new(fast_config());
        registry.register(Arc::new(executor));
        registry
    }

    #[tokio::test]
    async fn test_missing_executor() {
        let registry = ExecutorRegistry::new(EngineConfig::default());
        let context = Context::new("run-1", "tenant-1");
        let result = registry.run_node(&tool_node("a"), &context).await;
        assert!(matches!(result, Err(EngineError::MissingExecutor(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let registry = registry_with(FlakyExecutor {
            kind: NodeKind::Tool,
            attempts: attempts.clone(),
            fail_first: 2,
            max_attempts: 3,
            slow: false,
        });
        let context = Context::new("run-1", "tenant-1");

        let output = registry.run_node(&tool_node("a"), &context).await.unwrap();
        assert_eq!(output.output["attempt"], 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let registry = registry_with(FlakyExecutor {
            kind: NodeKind::Tool,
            attempts: attempts.clone(),
            fail_first: 10,
            max_attempts: 2,
            slow: false,
        });
        let context = Context::new("run-1", "tenant-1");

        let error = registry
            .run_node(&tool_node("a"), &context)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("attempt 2 failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_retries_field_overrides_executor() {
        let attempts = Arc::new(AtomicU32::new(0));
        let registry = registry_with(FlakyExecutor {
            kind: NodeKind::Tool,
            attempts: attempts.clone(),
            fail_first: 10,
            max_attempts: 1,
            slow: false,
        });
        let context = Context::new("run-1", "tenant-1");

        let mut node = tool_node("a");
        node.retries = Some(4);
        let _ = registry.run_node(&node, &context).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried_then_surfaced() {
        let attempts = Arc::new(AtomicU32::new(0));
        let registry = registry_with(FlakyExecutor {
            kind: NodeKind::Tool,
            attempts: attempts.clone(),
            fail_first: 0,
            max_attempts: 2,
            slow: true,
        });
        let context = Context::new("run-1", "tenant-1");

        let error = registry
            .run_node(&tool_node("a"), &context)
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Timeout { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
