//! Persistence boundary for runs and workflow definitions
//!
//! The scheduler and run manager consume storage through these narrow
//! traits; the `store` crate provides the SQLite implementations. Run
//! status updates are compare-and-set: a terminal status is never
//! overwritten, so a cancel racing natural termination is a no-op.

use crate::model::{NodeKind, Run, RunNode, RunNodeStatus, RunStatus, Workflow};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One node-state delta handed to the persistence hook
#[derive(Debug, Clone)]
pub struct NodeStateUpdate {
    /// Owning run
    pub run_id: String,
    /// Node within the workflow
    pub node_id: String,
    /// Node kind
    pub kind: NodeKind,
    /// New status
    pub status: RunNodeStatus,
    /// Output value when completed
    pub output: Option<Value>,
    /// Error message when failed
    pub error: Option<String>,
    /// Configured attempt count (inclusive of the first)
    pub retries: u32,
    /// When the first attempt started (Unix seconds)
    pub started_at: Option<i64>,
    /// When the node reached a terminal status (Unix seconds)
    pub ended_at: Option<i64>,
}

/// Repository for runs and their node records
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run record
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Compare-and-set the run status.
    ///
    /// The update applies only while the current status is non-terminal;
    /// returns whether a row changed.
    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: Option<i64>,
        error: Option<String>,
    ) -> Result<bool>;

    /// Load one run
    async fn load_run(&self, run_id: &str) -> Result<Option<Run>>;

    /// Insert or update the record for one (run, node) pair
    async fn upsert_run_node(&self, update: &NodeStateUpdate) -> Result<()>;

    /// Load every node record of a run
    async fn load_run_nodes(&self, run_id: &str) -> Result<Vec<RunNode>>;

    /// Runs whose persisted status is non-terminal (candidates for
    /// resume after a crash)
    async fn list_interrupted_runs(&self) -> Result<Vec<Run>>;
}

/// Repository for workflow definitions, persisted verbatim as JSON
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a definition
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    /// Load one definition
    async fn load_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>>;

    /// List all definitions
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    /// Remove a definition
    async fn delete_workflow(&self, workflow_id: &str) -> Result<()>;
}
