//! Human approval executor
//!
//! A human node suspends its task on a pending approval keyed
//! `runId:nodeId` until an external caller resolves it, its configured
//! deadline fires, or the run is cancelled. Never retries; the engine-wide
//! node timeout does not apply (the approval deadline governs).

use super::{NodeExecutor, NodeOutput};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::{HumanNodeConfig, Node, NodeKind};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tooling::pending::PendingMap;
use tracing::{debug, info};

/// A resolved approval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Whether the reviewer approved
    pub approved: bool,
    /// Who resolved the approval
    pub approver: String,
    /// Optional comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the decision was made (Unix seconds)
    pub approved_at: i64,
}

impl ApprovalDecision {
    /// An approval by `approver`
    pub fn approve(approver: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            approved: true,
            approver: approver.into(),
            comment,
            approved_at: Utc::now().timestamp(),
        }
    }

    /// A rejection by `approver`
    pub fn reject(approver: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            approved: false,
            approver: approver.into(),
            comment,
            approved_at: Utc::now().timestamp(),
        }
    }
}

/// Signal delivered to a waiting human node
#[derive(Debug, Clone)]
enum ApprovalSignal {
    Decision(ApprovalDecision),
    Cancelled,
}

/// Executor for `human` nodes, owner of all pending approvals
pub struct HumanExecutor {
    pending: PendingMap<ApprovalSignal>,
}

impl HumanExecutor {
    /// Create an executor with no pending approvals
    pub fn new() -> Self {
        Self {
            pending: PendingMap::new(),
        }
    }

    fn key(run_id: &str, node_id: &str) -> String {
        format!("{}:{}", run_id, node_id)
    }

    /// Resolve a pending approval with a decision.
    ///
    /// Errors when no approval is pending for the (run, node) pair.
    pub fn resolve(&self, run_id: &str, node_id: &str, decision: ApprovalDecision) -> Result<()> {
        let key = Self::key(run_id, node_id);
        if self.pending.resolve(&key, ApprovalSignal::Decision(decision)) {
            info!(run_id, node_id, "Approval resolved");
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "No pending approval for {}",
                key
            )))
        }
    }

    /// Cancel every pending approval of one run
    pub fn cancel_run(&self, run_id: &str) {
        let prefix = format!("{}:", run_id);
        for key in self.pending.keys_with_prefix(&prefix) {
            debug!(key = %key, "Cancelling pending approval");
            self.pending.resolve(&key, ApprovalSignal::Cancelled);
        }
    }

    /// Keys of all pending approvals (`runId:nodeId`)
    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.keys_with_prefix("")
    }

    /// Whether the (run, node) pair is currently waiting
    pub fn is_pending(&self, run_id: &str, node_id: &str) -> bool {
        self.pending.contains(&Self::key(run_id, node_id))
    }
}

impl Default for HumanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HumanExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Human
    }

    fn bounded_by_node_timeout(&self) -> bool {
        false
    }

    async fn execute(&self, node: &Node, context: &Context) -> Result<NodeOutput> {
        let config: HumanNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?;

        let key = Self::key(&context.run_id, &node.id);
        let receiver = self.pending.register(&key).ok_or_else(|| {
            EngineError::Execution(format!("Approval already pending for {}", key))
        })?;

        info!(
            run_id = %context.run_id,
            node_id = %node.id,
            prompt = config.prompt.as_deref().unwrap_or(""),
            "Waiting for approval"
        );

        let signal = match config.timeout {
            Some(seconds) => {
                match tokio::time::timeout(Duration::from_secs(seconds), receiver).await {
                    Ok(received) => received,
                    Err(_elapsed) => {
                        self.pending.remove(&key);
                        return Err(EngineError::ApprovalTimeout);
                    }
                }
            }
            None => receiver.await,
        };

        match signal {
            Ok(ApprovalSignal::Decision(decision)) if decision.approved => {
                Ok(NodeOutput::new(json!({
                    "approved": true,
                    "approver": decision.approver,
                    "comment": decision.comment,
                    "approvedAt": decision.approved_at,
                })))
            }
            Ok(ApprovalSignal::Decision(decision)) => Err(EngineError::ApprovalRejected {
                approver: decision.approver,
                comment: decision.comment,
            }),
            // The sender side went away without a decision.
            Ok(ApprovalSignal::Cancelled) | Err(_) => Err(EngineError::ApprovalCancelled),
        }
    }
}
