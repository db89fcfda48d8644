//! Execution events
//!
//! The scheduler emits typed events on a broadcast bus; consumers
//! (persistence sinks, external streams, loggers) subscribe independently.
//! Events carry millisecond timestamps and serialize with a snake_case
//! `type` tag for external streaming.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A node was dispatched
    NodeStarted {
        /// Owning run
        run_id: String,
        /// Dispatched node
        node_id: String,
        /// Event time (Unix millis)
        timestamp: i64,
    },
    /// A node produced its output
    NodeCompleted {
        /// Owning run
        run_id: String,
        /// Completed node
        node_id: String,
        /// The node's output value
        output: Value,
        /// Event time (Unix millis)
        timestamp: i64,
    },
    /// A node exhausted its attempts
    NodeFailed {
        /// Owning run
        run_id: String,
        /// Failed node
        node_id: String,
        /// Final error message
        error: String,
        /// Event time (Unix millis)
        timestamp: i64,
    },
    /// A human node is suspended on approval
    WaitingApproval {
        /// Owning run
        run_id: String,
        /// Suspended node
        node_id: String,
        /// The node's configuration payload
        config: Value,
        /// Event time (Unix millis)
        timestamp: i64,
    },
    /// Every node completed
    WorkflowCompleted {
        /// Owning run
        run_id: String,
        /// Event time (Unix millis)
        timestamp: i64,
    },
    /// Validation failed, a node failed, or the run got stuck
    WorkflowFailed {
        /// Owning run
        run_id: String,
        /// First fatal cause, in emission order
        error: String,
        /// Event time (Unix millis)
        timestamp: i64,
    },
}

impl ExecutionEvent {
    /// Create a NodeStarted event
    pub fn node_started(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NodeStarted {
            run_id: run_id.into(),
            node_id: node_id.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a NodeCompleted event
    pub fn node_completed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        output: Value,
    ) -> Self {
        Self::NodeCompleted {
            run_id: run_id.into(),
            node_id: node_id.into(),
            output,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a NodeFailed event
    pub fn node_failed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::NodeFailed {
            run_id: run_id.into(),
            node_id: node_id.into(),
            error: error.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a WaitingApproval event
    pub fn waiting_approval(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        config: Value,
    ) -> Self {
        Self::WaitingApproval {
            run_id: run_id.into(),
            node_id: node_id.into(),
            config,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a WorkflowCompleted event
    pub fn workflow_completed(run_id: impl Into<String>) -> Self {
        Self::WorkflowCompleted {
            run_id: run_id.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create a WorkflowFailed event
    pub fn workflow_failed(run_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::WorkflowFailed {
            run_id: run_id.into(),
            error: error.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The owning run
    pub fn run_id(&self) -> &str {
        match self {
            Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::WaitingApproval { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. } => run_id,
        }
    }

    /// The node the event concerns, when any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::WaitingApproval { node_id, .. } => Some(node_id),
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. } => None,
        }
    }

    /// Event time (Unix millis)
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::NodeStarted { timestamp, .. }
            | Self::NodeCompleted { timestamp, .. }
            | Self::NodeFailed { timestamp, .. }
            | Self::WaitingApproval { timestamp, .. }
            | Self::WorkflowCompleted { timestamp, .. }
            | Self::WorkflowFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcast bus for execution events.
///
/// Cloning is cheap; clones publish to the same subscribers. Emission
/// never blocks and never fails: events published with no subscribers are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe; the receiver sees events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: ExecutionEvent) {
        tracing::debug!(
            run_id = event.run_id(),
            node_id = event.node_id().unwrap_or(""),
            event = ?event,
            "Execution event"
        );
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
