//! Error types for the workflow engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced during workflow validation and execution
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow structure is invalid
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// A dependency edge points past the end of the graph
    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    DanglingDependency {
        /// Node declaring the dependency
        node: String,
        /// The missing dependency id
        dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("Dependency cycle detected at node '{0}'")]
    CyclicGraph(String),

    /// A node's configuration does not match its kind
    #[error("Invalid config for node '{node}': {error}")]
    Configuration {
        /// Node with the bad config
        node: String,
        /// Parse error
        error: String,
    },

    /// A node's external call failed, or the node returned an error
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Node execution failure with node context
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node that failed
        node: String,
        /// Error message
        error: String,
    },

    /// No executor registered for a node kind
    #[error("No executor registered for node kind '{0}'")]
    MissingExecutor(String),

    /// A single execution attempt exceeded its deadline
    #[error("Node '{node}' timed out after {seconds}s")]
    Timeout {
        /// Node that timed out
        node: String,
        /// Deadline that elapsed
        seconds: u64,
    },

    /// A human reviewer rejected the approval
    #[error("Approval rejected by {approver}{}", comment.as_ref().map(|c| format!(": {}", c)).unwrap_or_default())]
    ApprovalRejected {
        /// Who rejected
        approver: String,
        /// Optional comment
        comment: Option<String>,
    },

    /// The approval wait exceeded its configured deadline
    #[error("Approval timeout")]
    ApprovalTimeout,

    /// The approval wait was cancelled
    #[error("Approval cancelled")]
    ApprovalCancelled,

    /// A run, workflow, or pending approval was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence failed; logged and swallowed inside the scheduler,
    /// surfaced only from direct repository calls
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON encoding/decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Node execution failure with node context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Config parse failure for a node
    pub fn configuration(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Configuration {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Whether a retry wrapper may re-attempt after this error.
    ///
    /// Structural errors and approval outcomes are final; everything else
    /// (transport failures, timeouts, collaborator errors) may be
    /// transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_)
                | Self::DanglingDependency { .. }
                | Self::CyclicGraph(_)
                | Self::Configuration { .. }
                | Self::MissingExecutor(_)
                | Self::ApprovalRejected { .. }
                | Self::ApprovalTimeout
                | Self::ApprovalCancelled
                | Self::NotFound(_)
        )
    }
}

impl From<llm::LlmError> for EngineError {
    fn from(e: llm::LlmError) -> Self {
        Self::Execution(e.to_string())
    }
}

impl From<mcp::McpError> for EngineError {
    fn from(e: mcp::McpError) -> Self {
        Self::Execution(e.to_string())
    }
}
