//! Shared fixtures: in-memory stores and scripted node executors.
#![allow(dead_code)]

use async_trait::async_trait;
use engine::persistence::{NodeStateUpdate, RunStore, WorkflowStore};
use engine::{
    Context, EngineError, ExecutionEvent, Node, NodeExecutor, NodeKind, NodeOutput, Result, Run,
    RunNode, RunNodeStatus, RunStatus, Workflow,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// In-memory RunStore with compare-and-set status updates
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, Run>>,
    nodes: Mutex<HashMap<(String, String), RunNode>>,
}

impl MemoryRunStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn run(&self, run_id: &str) -> Option<Run> {
        self.runs.lock().get(run_id).cloned()
    }

    pub fn node(&self, run_id: &str, node_id: &str) -> Option<RunNode> {
        self.nodes
            .lock()
            .get(&(run_id.to_string(), node_id.to_string()))
            .cloned()
    }

    pub fn node_count(&self, run_id: &str) -> usize {
        self.nodes
            .lock()
            .keys()
            .filter(|(run, _)| run == run_id)
            .count()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.lock().insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: Option<i64>,
        error: Option<String>,
    ) -> Result<bool> {
        let mut runs = self.runs.lock();
        let run = match runs.get_mut(run_id) {
            Some(run) => run,
            None => return Ok(false),
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(chrono::Utc::now().timestamp());
        }
        if ended_at.is_some() {
            run.ended_at = ended_at;
        }
        if error.is_some() {
            run.error = error;
        }
        Ok(true)
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.runs.lock().get(run_id).cloned())
    }

    async fn upsert_run_node(&self, update: &NodeStateUpdate) -> Result<()> {
        let key = (update.run_id.clone(), update.node_id.clone());
        let mut nodes = self.nodes.lock();
        let record = nodes.entry(key).or_insert_with(|| RunNode {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: update.run_id.clone(),
            node_id: update.node_id.clone(),
            kind: update.kind,
            status: RunNodeStatus::Pending,
            output: None,
            error: None,
            retries: update.retries,
            started_at: None,
            ended_at: None,
            created_at: chrono::Utc::now().timestamp(),
        });
        record.status = update.status;
        record.output = update.output.clone();
        record.error = update.error.clone();
        record.retries = update.retries;
        record.started_at = update.started_at;
        record.ended_at = update.ended_at;
        Ok(())
    }

    async fn load_run_nodes(&self, run_id: &str) -> Result<Vec<RunNode>> {
        Ok(self
            .nodes
            .lock()
            .values()
            .filter(|node| node.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn list_interrupted_runs(&self) -> Result<Vec<Run>> {
        Ok(self
            .runs
            .lock()
            .values()
            .filter(|run| !run.status.is_terminal())
            .cloned()
            .collect())
    }
}

/// In-memory WorkflowStore
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: Mutex<HashMap<String, Workflow>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .lock()
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.lock().get(workflow_id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.lock().values().cloned().collect())
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        self.workflows.lock().remove(workflow_id);
        Ok(())
    }
}

/// Scripted behavior of one node under a [`StubExecutor`]
#[derive(Clone)]
pub enum StubBehavior {
    /// Return this value immediately
    Succeed(Value),
    /// Sleep, then return this value (for overlap assertions)
    SucceedAfter(Duration, Value),
    /// Resolve this template against the context and return `{"text": ...}`
    Template(String),
    /// Fail every attempt with this message
    FailAlways(String),
}

/// Executor whose per-node behavior is scripted by the test.
///
/// Tracks the number of simultaneously active executions so tests can
/// assert the concurrency bound and overlap.
pub struct StubExecutor {
    kind: NodeKind,
    max_attempts: u32,
    behaviors: HashMap<String, StubBehavior>,
    pub calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl StubExecutor {
    pub fn new(kind: NodeKind, behaviors: HashMap<String, StubBehavior>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            max_attempts: 1,
            behaviors,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn with_attempts(
        kind: NodeKind,
        max_attempts: u32,
        behaviors: HashMap<String, StubBehavior>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            max_attempts,
            behaviors,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == node_id).count()
    }
}

#[async_trait]
impl NodeExecutor for StubExecutor {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        self.calls.lock().push(node.id.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(&node.id)
            .cloned()
            .unwrap_or(StubBehavior::Succeed(Value::Null));

        let result = match behavior {
            StubBehavior::Succeed(value) => Ok(NodeOutput::new(value)),
            StubBehavior::SucceedAfter(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(NodeOutput::new(value))
            }
            StubBehavior::Template(template) => {
                let text = engine::resolver::resolve_str(&template, context);
                Ok(NodeOutput::new(serde_json::json!({"text": text})))
            }
            StubBehavior::FailAlways(message) => Err(EngineError::Execution(message)),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Collect events until the run's terminal event (or panic after 5s)
pub async fn collect_until_terminal(
    receiver: &mut broadcast::Receiver<ExecutionEvent>,
) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("terminal event within 5s")
            .expect("event stream open");
        let terminal = matches!(
            event,
            ExecutionEvent::WorkflowCompleted { .. } | ExecutionEvent::WorkflowFailed { .. }
        );
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Index of the first event matching the predicate
pub fn position<F: Fn(&ExecutionEvent) -> bool>(events: &[ExecutionEvent], pred: F) -> Option<usize> {
    events.iter().position(pred)
}

pub fn started(node_id: &str) -> impl Fn(&ExecutionEvent) -> bool + '_ {
    move |event| matches!(event, ExecutionEvent::NodeStarted { node_id: id, .. } if id == node_id)
}

pub fn completed(node_id: &str) -> impl Fn(&ExecutionEvent) -> bool + '_ {
    move |event| matches!(event, ExecutionEvent::NodeCompleted { node_id: id, .. } if id == node_id)
}

pub fn failed(node_id: &str) -> impl Fn(&ExecutionEvent) -> bool + '_ {
    move |event| matches!(event, ExecutionEvent::NodeFailed { node_id: id, .. } if id == node_id)
}
