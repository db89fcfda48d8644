//! Tool (command) node executor
//!
//! Resolves templates in the command line, environment values, and working
//! directory, then issues one execute request to the command-runner
//! collaborator. A non-zero exit code is a successful execution with a
//! non-zero status; only transport and collaborator failures are errors
//! (and retry, two attempts by default).

use super::{NodeExecutor, NodeOutput};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::{Node, NodeKind, ToolNodeConfig};
use crate::resolver;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tooling::runtime::{CommandRequest, CommandRunner};
use tracing::debug;

/// Executor for `tool` nodes
pub struct ToolExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl ToolExecutor {
    /// Create an executor against a command-runner collaborator
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Tool
    }

    fn max_attempts(&self) -> u32 {
        2
    }

    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        let config: ToolNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?;

        let env = config
            .env
            .iter()
            .map(|(name, value)| (name.clone(), resolver::resolve_str(value, context)))
            .collect();

        let request = CommandRequest {
            executor: config.executor,
            command: resolver::resolve_str(&config.command, context),
            working_dir: config
                .working_dir
                .as_deref()
                .map(|dir| resolver::resolve_str(dir, context)),
            env,
            timeout: config.timeout,
            image: config.image,
        };

        debug!(node_id = %node.id, executor = %request.executor, "Executing command");
        let result = self
            .runner
            .execute(request)
            .await
            .map_err(|e| EngineError::Execution(e.to_string()))?;

        let metadata = json!({"duration": result.duration});
        Ok(NodeOutput::new(serde_json::to_value(&result)?).with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use tooling::runtime::ExecutionResult;
    use tooling::ToolingError;

    struct RecordingRunner {
        requests: Mutex<Vec<CommandRequest>>,
        exit_code: i32,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn execute(&self, request: CommandRequest) -> tooling::Result<ExecutionResult> {
            self.requests.lock().push(request);
            if self.fail {
                return Err(ToolingError::General("executor unreachable".to_string()));
            }
            Ok(ExecutionResult {
                exit_code: self.exit_code,
                stdout: "out".to_string(),
                stderr: String::new(),
                duration: 40,
            })
        }
    }

    fn tool_node() -> Node {
        serde_json::from_value(json!({
            "id": "t",
            "type": "tool",
            "config": {
                "command": "grep ${variables.pattern} input.txt",
                "workingDir": "/work/${variables.dir}",
                "env": {"PATTERN": "${variables.pattern}"}
            }
        }))
        .unwrap()
    }

    fn context() -> Context {
        let mut variables = serde_json::Map::new();
        variables.insert("pattern".to_string(), json!("TODO"));
        variables.insert("dir".to_string(), json!("src"));
        Context::new("run-1", "tenant-1").with_variables(variables)
    }

    #[tokio::test]
    async fn test_resolves_command_env_and_working_dir() {
        let runner = Arc::new(RecordingRunner {
            requests: Mutex::new(Vec::new()),
            exit_code: 0,
            fail: false,
        });
        let executor = ToolExecutor::new(runner.clone());

        let output = executor.execute(&tool_node(), &context()).await.unwrap();
        assert_eq!(output.output["exitCode"], 0);
        assert_eq!(output.output["stdout"], "out");

        let requests = runner.requests.lock();
        assert_eq!(requests[0].command, "grep TODO input.txt");
        assert_eq!(requests[0].working_dir.as_deref(), Some("/work/src"));
        assert_eq!(requests[0].env["PATTERN"], "TODO");
        assert_eq!(requests[0].executor, "shell");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_success() {
        let runner = Arc::new(RecordingRunner {
            requests: Mutex::new(Vec::new()),
            exit_code: 2,
            fail: false,
        });
        let executor = ToolExecutor::new(runner);

        let output = executor.execute(&tool_node(), &context()).await.unwrap();
        assert_eq!(output.output["exitCode"], 2);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_execution_error() {
        let runner = Arc::new(RecordingRunner {
            requests: Mutex::new(Vec::new()),
            exit_code: 0,
            fail: true,
        });
        let executor = ToolExecutor::new(runner);

        let error = executor
            .execute(&tool_node(), &context())
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Execution(_)));
        assert!(error.is_retryable());
    }
}
