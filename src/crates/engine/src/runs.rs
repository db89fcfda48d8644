//! Run lifecycle management
//!
//! Creates Run records, seeds contexts from the declared inputs schema,
//! drives the scheduler, and finalises run status with compare-and-set
//! semantics (a terminal status is never overwritten, so cancel racing
//! natural termination is a no-op). Also the external entry points for
//! approvals, cancellation, resume, and crash recovery.

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::executor::{ApprovalDecision, ExecutorRegistry, HumanExecutor};
use crate::model::{Run, RunNodeStatus, RunStatus, Workflow};
use crate::persistence::{RunStore, WorkflowStore};
use crate::scheduler::{RunOutcome, WorkflowExecutor};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Owns active runs and their schedulers
pub struct RunManager {
    store: Arc<dyn RunStore>,
    workflows: Arc<dyn WorkflowStore>,
    registry: Arc<ExecutorRegistry>,
    human: Arc<HumanExecutor>,
    events: EventBus,
    config: EngineConfig,
    active: Mutex<HashMap<String, Arc<WorkflowExecutor>>>,
}

impl RunManager {
    /// Create a run manager
    pub fn new(
        store: Arc<dyn RunStore>,
        workflows: Arc<dyn WorkflowStore>,
        registry: Arc<ExecutorRegistry>,
        human: Arc<HumanExecutor>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            workflows,
            registry,
            human,
            events,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the execution event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<crate::events::ExecutionEvent> {
        self.events.subscribe()
    }

    /// Ids of runs currently executing in this process
    pub fn active_runs(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }

    /// Create a run and execute it to a terminal status.
    ///
    /// Inputs are validated against the workflow's declared schema
    /// (defaults applied, required inputs enforced) before the run record
    /// is created.
    pub async fn start_run(
        &self,
        workflow: &Workflow,
        inputs: Map<String, serde_json::Value>,
        tenant_id: &str,
    ) -> Result<Run> {
        let variables = workflow.seed_inputs(&inputs)?;
        let run = Run::new(&workflow.id, tenant_id, inputs);
        self.store.save_run(&run).await?;

        let context = Context::new(&run.id, tenant_id).with_variables(variables);
        self.drive(workflow, run, context, HashSet::new()).await
    }

    /// Resume a previously interrupted run.
    ///
    /// The context is rebuilt from persisted node outputs; nodes already
    /// completed are never re-executed, previously failed nodes are
    /// eligible again.
    pub async fn resume_run(&self, workflow: &Workflow, run_id: &str) -> Result<Run> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Run '{}' not found", run_id)))?;
        if run.status.is_terminal() {
            return Err(EngineError::Execution(format!(
                "Run '{}' already reached terminal status '{}'",
                run_id, run.status
            )));
        }

        let variables = workflow.seed_inputs(&run.inputs)?;
        let mut context = Context::new(run_id, &run.tenant_id).with_variables(variables);

        let mut completed = HashSet::new();
        for node in self.store.load_run_nodes(run_id).await? {
            if node.status == RunNodeStatus::Completed {
                if let Some(output) = node.output {
                    context.set_output(&node.node_id, output);
                }
                completed.insert(node.node_id);
            }
        }

        info!(
            run_id,
            completed = completed.len(),
            "Resuming interrupted run"
        );
        self.drive(workflow, run, context, completed).await
    }

    /// Resume every interrupted run in the background.
    ///
    /// Best-effort: a run whose workflow definition is gone, or whose
    /// resume fails, is logged and marked failed without affecting the
    /// others. Returns the run ids scheduled for resume.
    pub async fn recover(self: Arc<Self>) -> Result<Vec<String>> {
        let interrupted = self.store.list_interrupted_runs().await?;
        let mut scheduled = Vec::new();

        for run in interrupted {
            scheduled.push(run.id.clone());
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                let workflow = match manager.workflows.load_workflow(&run.workflow_id).await {
                    Ok(Some(workflow)) => workflow,
                    Ok(None) => {
                        warn!(
                            run_id = %run.id,
                            workflow_id = %run.workflow_id,
                            "Cannot recover run: workflow definition missing"
                        );
                        manager
                            .finalize_status(
                                &run.id,
                                RunStatus::Failed,
                                Some("Workflow definition missing on recovery".to_string()),
                            )
                            .await;
                        return;
                    }
                    Err(e) => {
                        warn!(run_id = %run.id, error = %e, "Cannot recover run");
                        return;
                    }
                };

                if let Err(e) = manager.resume_run(&workflow, &run.id).await {
                    warn!(run_id = %run.id, error = %e, "Run recovery failed");
                }
            });
        }

        info!(count = scheduled.len(), "Scheduled interrupted runs for recovery");
        Ok(scheduled)
    }

    /// Resolve a pending approval for a running human node
    pub fn approve(
        &self,
        run_id: &str,
        node_id: &str,
        approver: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<()> {
        let decision = if approved {
            ApprovalDecision::approve(approver, comment)
        } else {
            ApprovalDecision::reject(approver, comment)
        };
        self.human.resolve(run_id, node_id, decision)
    }

    /// Request cancellation of a run.
    ///
    /// For an active run the scheduler winds down cooperatively and the
    /// terminal status lands through its outcome; for an inactive run the
    /// status moves straight to cancelled. Either path is a no-op when the
    /// run already reached a terminal status.
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        let executor = self.active.lock().get(run_id).cloned();
        match executor {
            Some(executor) => {
                executor.cancel();
                Ok(())
            }
            None => {
                let changed = self
                    .store
                    .update_run_status(
                        run_id,
                        RunStatus::Cancelled,
                        Some(Utc::now().timestamp()),
                        None,
                    )
                    .await?;
                if changed {
                    info!(run_id, "Inactive run cancelled");
                }
                Ok(())
            }
        }
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        mut run: Run,
        mut context: Context,
        completed: HashSet<String>,
    ) -> Result<Run> {
        self.finalize_status(&run.id, RunStatus::Running, None).await;
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now().timestamp());

        let executor = Arc::new(WorkflowExecutor::new(
            &run.id,
            Arc::clone(&self.registry),
            Arc::clone(&self.human),
            self.events.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
        ));
        self.active
            .lock()
            .insert(run.id.clone(), Arc::clone(&executor));

        let result = if completed.is_empty() {
            executor.execute(workflow, &mut context).await
        } else {
            executor.resume(workflow, &mut context, completed).await
        };
        self.active.lock().remove(&run.id);
        // The context is dropped here with the run's terminal status.

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                self.finalize_status(&run.id, RunStatus::Failed, Some(message.clone()))
                    .await;
                run.status = RunStatus::Failed;
                run.error = Some(message);
                run.ended_at = Some(Utc::now().timestamp());
                return Err(e);
            }
        };

        let (status, error) = match outcome {
            RunOutcome::Completed => (RunStatus::Completed, None),
            RunOutcome::Failed { error } => (RunStatus::Failed, Some(error)),
            RunOutcome::Cancelled => (RunStatus::Cancelled, None),
        };
        self.finalize_status(&run.id, status, error.clone()).await;
        run.status = status;
        run.error = error;
        run.ended_at = Some(Utc::now().timestamp());
        Ok(run)
    }

    async fn finalize_status(&self, run_id: &str, status: RunStatus, error: Option<String>) {
        let ended_at = status.is_terminal().then(|| Utc::now().timestamp());
        match self
            .store
            .update_run_status(run_id, status, ended_at, error)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Already terminal; compare-and-set keeps the first writer.
                info!(run_id, attempted = %status, "Run status already terminal, keeping it");
            }
            Err(e) => {
                warn!(run_id, status = %status, error = %e, "Failed to persist run status");
            }
        }
    }
}
