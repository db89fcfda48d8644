//! Workflow scheduler
//!
//! The execution loop of one run: computes runnable nodes against the
//! completed set, dispatches them as independent tasks under the
//! concurrency bound, records outputs, emits events, and invokes the
//! best-effort persistence hook on terminal node transitions. Wakeups are
//! signalled by node completions and the cancel flag; the loop never
//! busy-waits.
//!
//! Set discipline: `running`, `completed`, `failed`, and the context's
//! outputs are touched only on the scheduler task. Node tasks receive a
//! context snapshot taken at dispatch, which is complete for their
//! dependency cone because every dependency settled in an earlier loop
//! iteration.

use crate::config::EngineConfig;
use crate::context::Context;
use crate::dag;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, ExecutionEvent};
use crate::executor::{ExecutorRegistry, HumanExecutor, NodeOutput};
use crate::model::{Node, NodeKind, RunNodeStatus, RunStatus, Workflow};
use crate::persistence::{NodeStateUpdate, RunStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Terminal outcome of one scheduler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every node completed
    Completed,
    /// A node failed or the run got stuck; carries the first fatal cause
    Failed {
        /// First fatal cause in event-emission order
        error: String,
    },
    /// Cancel was requested and honored
    Cancelled,
}

struct NodeCompletion {
    node: Node,
    retries: u32,
    started_at: i64,
    ended_at: i64,
    result: Result<NodeOutput>,
}

/// Executes one run of one workflow.
///
/// Create one executor per run; `cancel` applies to the run in flight.
pub struct WorkflowExecutor {
    run_id: String,
    registry: Arc<ExecutorRegistry>,
    human: Arc<HumanExecutor>,
    events: EventBus,
    store: Arc<dyn RunStore>,
    config: EngineConfig,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

impl WorkflowExecutor {
    /// Create an executor for one run
    pub fn new(
        run_id: impl Into<String>,
        registry: Arc<ExecutorRegistry>,
        human: Arc<HumanExecutor>,
        events: EventBus,
        store: Arc<dyn RunStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            registry,
            human,
            events,
            store,
            config,
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// The run this executor drives
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Subscribe to this run's execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Execute a workflow from scratch.
    ///
    /// Validation failures emit `workflow_failed` and propagate to the
    /// caller; execution failures are reported through the outcome.
    pub async fn execute(&self, workflow: &Workflow, context: &mut Context) -> Result<RunOutcome> {
        self.start(workflow, context, HashSet::new()).await
    }

    /// Resume a workflow, never re-executing the given completed nodes.
    ///
    /// The caller rebuilds the context from persisted outputs. Previously
    /// failed nodes are eligible again.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        context: &mut Context,
        completed: HashSet<String>,
    ) -> Result<RunOutcome> {
        self.start(workflow, context, completed).await
    }

    async fn start(
        &self,
        workflow: &Workflow,
        context: &mut Context,
        completed: HashSet<String>,
    ) -> Result<RunOutcome> {
        self.cancel_requested.store(false, Ordering::SeqCst);

        if let Err(e) = dag::validate(workflow) {
            self.events
                .emit(ExecutionEvent::workflow_failed(&self.run_id, e.to_string()));
            return Err(e);
        }

        info!(
            run_id = %self.run_id,
            workflow_id = %workflow.id,
            nodes = workflow.nodes.len(),
            resumed = completed.len(),
            "Starting workflow execution"
        );

        Ok(self.run_loop(workflow, context, completed).await)
    }

    /// Request cooperative cancellation: stop dispatching, cancel pending
    /// approvals. In-flight nodes run to completion under their own
    /// timeouts.
    pub fn cancel(&self) {
        info!(run_id = %self.run_id, "Cancel requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_one();
        self.human.cancel_run(&self.run_id);
    }

    fn cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    async fn run_loop(
        &self,
        workflow: &Workflow,
        context: &mut Context,
        mut completed: HashSet<String>,
    ) -> RunOutcome {
        let dependencies = workflow.dependency_map();
        let total = workflow.nodes.len();
        let mut running: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut first_error: Option<String> = None;
        let (done_tx, mut done_rx) = mpsc::channel::<NodeCompletion>(total.max(1));

        while completed.len() < total && !self.cancelled() {
            let candidates: Vec<String> = dag::runnable_with(workflow, &dependencies, &completed)
                .into_iter()
                .filter(|id| !running.contains(id) && !failed.contains(id))
                .collect();

            if candidates.is_empty() && running.is_empty() {
                let stranded: Vec<&str> = workflow
                    .nodes
                    .iter()
                    .filter(|n| !completed.contains(&n.id) && !failed.contains(&n.id))
                    .map(|n| n.id.as_str())
                    .collect();
                warn!(
                    run_id = %self.run_id,
                    stranded = ?stranded,
                    "Run is stuck: failed dependencies leave no runnable nodes"
                );
                if first_error.is_none() {
                    first_error = Some(format!(
                        "Run is stuck: nodes [{}] can never become runnable",
                        stranded.join(", ")
                    ));
                }
                break;
            }

            let capacity = self.config.max_concurrent.saturating_sub(running.len());
            for node_id in candidates.into_iter().take(capacity) {
                let node = workflow
                    .node(&node_id)
                    .expect("validated workflow contains its runnable nodes")
                    .clone();

                let Some(executor) = self.registry.get(node.kind) else {
                    // No event for a node that cannot start at all.
                    error!(
                        run_id = %self.run_id,
                        node_id = %node_id,
                        kind = %node.kind,
                        "No executor registered; marking node failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(format!(
                            "No executor registered for node kind '{}'",
                            node.kind
                        ));
                    }
                    failed.insert(node_id);
                    continue;
                };

                running.insert(node_id);
                self.dispatch(node, executor.max_attempts(), context, &done_tx)
                    .await;
            }

            if running.is_empty() {
                continue;
            }

            tokio::select! {
                maybe = done_rx.recv() => {
                    if let Some(done) = maybe {
                        self.settle(done, context, &mut running, &mut completed, &mut failed, &mut first_error)
                            .await;
                    }
                }
                _ = self.cancel_notify.notified() => {}
            }
        }

        // In-flight nodes run to completion; cancellation is cooperative.
        while !running.is_empty() {
            if self.cancelled() {
                // A human node dispatched just before cancel can register
                // its approval wait after the cancel sweep; sweep again
                // until the in-flight set drains.
                tokio::select! {
                    maybe = done_rx.recv() => match maybe {
                        Some(done) => {
                            self.settle(done, context, &mut running, &mut completed, &mut failed, &mut first_error)
                                .await;
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        self.human.cancel_run(&self.run_id);
                    }
                }
            } else {
                match done_rx.recv().await {
                    Some(done) => {
                        self.settle(done, context, &mut running, &mut completed, &mut failed, &mut first_error)
                            .await;
                    }
                    None => break,
                }
            }
        }

        if self.cancelled() {
            info!(run_id = %self.run_id, "Workflow execution cancelled");
            return RunOutcome::Cancelled;
        }

        if completed.len() == total {
            info!(run_id = %self.run_id, "Workflow execution completed");
            self.events
                .emit(ExecutionEvent::workflow_completed(&self.run_id));
            RunOutcome::Completed
        } else {
            let error = first_error.unwrap_or_else(|| "Workflow execution failed".to_string());
            self.events
                .emit(ExecutionEvent::workflow_failed(&self.run_id, &error));
            RunOutcome::Failed { error }
        }
    }

    async fn dispatch(
        &self,
        node: Node,
        default_attempts: u32,
        context: &Context,
        done_tx: &mpsc::Sender<NodeCompletion>,
    ) {
        let retries = node.retries.unwrap_or(default_attempts).max(1);
        let started_at = Utc::now().timestamp();

        self.events
            .emit(ExecutionEvent::node_started(&self.run_id, &node.id));
        if node.kind == NodeKind::Human {
            self.events.emit(ExecutionEvent::waiting_approval(
                &self.run_id,
                &node.id,
                node.config.clone(),
            ));
            self.set_run_status(RunStatus::Waiting).await;
        }

        if self.config.persist_running {
            self.persist(NodeStateUpdate {
                run_id: self.run_id.clone(),
                node_id: node.id.clone(),
                kind: node.kind,
                status: RunNodeStatus::Running,
                output: None,
                error: None,
                retries,
                started_at: Some(started_at),
                ended_at: None,
            })
            .await;
        }

        debug!(run_id = %self.run_id, node_id = %node.id, kind = %node.kind, "Dispatching node");

        let registry = Arc::clone(&self.registry);
        let snapshot = context.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = registry.run_node(&node, &snapshot).await;
            let completion = NodeCompletion {
                node,
                retries,
                started_at,
                ended_at: Utc::now().timestamp(),
                result,
            };
            // The scheduler only drops the receiver after draining running
            // nodes, so this send fails only when the whole run is gone.
            let _ = done_tx.send(completion).await;
        });
    }

    async fn settle(
        &self,
        done: NodeCompletion,
        context: &mut Context,
        running: &mut HashSet<String>,
        completed: &mut HashSet<String>,
        failed: &mut HashSet<String>,
        first_error: &mut Option<String>,
    ) {
        let NodeCompletion {
            node,
            retries,
            started_at,
            ended_at,
            result,
        } = done;
        running.remove(&node.id);

        match result {
            Ok(output) => {
                completed.insert(node.id.clone());
                context.set_output(&node.id, output.output.clone());

                self.persist(NodeStateUpdate {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    kind: node.kind,
                    status: RunNodeStatus::Completed,
                    output: Some(output.output.clone()),
                    error: None,
                    retries,
                    started_at: Some(started_at),
                    ended_at: Some(ended_at),
                })
                .await;

                if node.kind == NodeKind::Human {
                    self.set_run_status(RunStatus::Running).await;
                }

                self.events.emit(ExecutionEvent::node_completed(
                    &self.run_id,
                    &node.id,
                    output.output,
                ));
            }
            Err(error) => {
                failed.insert(node.id.clone());
                let message = error.to_string();
                if first_error.is_none() {
                    *first_error = Some(format!("Node '{}' failed: {}", node.id, message));
                }

                self.persist(NodeStateUpdate {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    kind: node.kind,
                    status: RunNodeStatus::Failed,
                    output: None,
                    error: Some(message.clone()),
                    retries,
                    started_at: Some(started_at),
                    ended_at: Some(ended_at),
                })
                .await;

                self.events
                    .emit(ExecutionEvent::node_failed(&self.run_id, &node.id, message));
            }
        }
    }

    /// Invoke the persistence hook; failures are logged and swallowed.
    /// Durability is the caller's concern, the in-memory run is the source
    /// of truth.
    async fn persist(&self, update: NodeStateUpdate) {
        let outcome = tooling::async_utils::with_timeout(
            self.config.persist_timeout,
            self.store.upsert_run_node(&update),
        )
        .await;

        if let Err(e) = outcome {
            warn!(
                run_id = %update.run_id,
                node_id = %update.node_id,
                status = %update.status,
                error = %e,
                "Persistence hook failed; continuing"
            );
        }
    }

    async fn set_run_status(&self, status: RunStatus) {
        let outcome = tooling::async_utils::with_timeout(
            self.config.persist_timeout,
            self.store.update_run_status(&self.run_id, status, None, None),
        )
        .await;

        if let Err(e) = outcome {
            warn!(run_id = %self.run_id, status = %status, error = %e, "Run status update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NodeExecutor;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullStore;

    #[async_trait]
    impl RunStore for NullStore {
        async fn save_run(&self, _run: &crate::model::Run) -> Result<()> {
            Ok(())
        }
        async fn update_run_status(
            &self,
            _run_id: &str,
            _status: RunStatus,
            _ended_at: Option<i64>,
            _error: Option<String>,
        ) -> Result<bool> {
            Ok(true)
        }
        async fn load_run(&self, _run_id: &str) -> Result<Option<crate::model::Run>> {
            Ok(None)
        }
        async fn upsert_run_node(&self, _update: &NodeStateUpdate) -> Result<()> {
            Ok(())
        }
        async fn load_run_nodes(&self, _run_id: &str) -> Result<Vec<crate::model::RunNode>> {
            Ok(Vec::new())
        }
        async fn list_interrupted_runs(&self) -> Result<Vec<crate::model::Run>> {
            Ok(Vec::new())
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl NodeExecutor for EchoExecutor {
        fn kind(&self) -> NodeKind {
            NodeKind::Tool
        }
        async fn execute(&self, node: &Node, _context: &Context) -> Result<NodeOutput> {
            Ok(NodeOutput::new(json!({"node": node.id})))
        }
    }

    fn executor_for(workflow_run: &str, registry: ExecutorRegistry) -> WorkflowExecutor {
        WorkflowExecutor::new(
            workflow_run,
            Arc::new(registry),
            Arc::new(HumanExecutor::new()),
            EventBus::default(),
            Arc::new(NullStore),
            EngineConfig::default(),
        )
    }

    fn tool_workflow(nodes: serde_json::Value) -> Workflow {
        serde_json::from_value(json!({
            "id": "wf-1",
            "name": "wf",
            "version": "1",
            "nodes": nodes,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_validation_failure_emits_workflow_failed_and_propagates() {
        let registry = ExecutorRegistry::new(EngineConfig::default());
        let executor = executor_for("run-1", registry);
        let mut events = executor.events.subscribe();

        let workflow = tool_workflow(json!([
            {"id": "x", "type": "tool", "config": {"command": "true"}, "dependencies": ["y"]},
            {"id": "y", "type": "tool", "config": {"command": "true"}, "dependencies": ["x"]},
        ]));

        let mut context = Context::new("run-1", "tenant-1");
        let result = executor.execute(&workflow, &mut context).await;
        assert!(matches!(result, Err(EngineError::CyclicGraph(_))));

        match events.recv().await.unwrap() {
            ExecutionEvent::WorkflowFailed { error, .. } => {
                assert!(error.contains("cycle"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executor_fails_without_node_events() {
        let registry = ExecutorRegistry::new(EngineConfig::default());
        let executor = executor_for("run-1", registry);
        let mut events = executor.events.subscribe();

        let workflow = tool_workflow(json!([
            {"id": "a", "type": "tool", "config": {"command": "true"}},
        ]));

        let mut context = Context::new("run-1", "tenant-1");
        let outcome = executor.execute(&workflow, &mut context).await.unwrap();
        match outcome {
            RunOutcome::Failed { error } => assert!(error.contains("No executor registered")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The only event is the terminal workflow_failed.
        match events.recv().await.unwrap() {
            ExecutionEvent::WorkflowFailed { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_execute_short_circuits_nothing() {
        let mut registry = ExecutorRegistry::new(EngineConfig::default());
        registry.register(Arc::new(EchoExecutor));
        let executor = executor_for("run-1", registry);

        let workflow = tool_workflow(json!([
            {"id": "a", "type": "tool", "config": {"command": "true"}},
        ]));

        // Cancel state is cleared when execution starts.
        executor.cancel();
        let mut context = Context::new("run-1", "tenant-1");
        let outcome = executor.execute(&workflow, &mut context).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(context.outputs["a"]["node"], "a");
    }
}
