//! Per-run execution context
//!
//! The in-memory bag of input variables and produced node outputs, the
//! sole source for template resolution. Owned by the workflow executor for
//! the duration of the run and dropped when the run reaches a terminal
//! status; node tasks receive snapshots whose entries are complete for
//! their dependency cone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// In-memory execution state of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Owning run
    pub run_id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Input variables, seeded at run creation
    pub variables: Map<String, Value>,

    /// Outputs of completed nodes, keyed by node id
    pub outputs: Map<String, Value>,
}

impl Context {
    /// Create an empty context for a run
    pub fn new(run_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            variables: Map::new(),
            outputs: Map::new(),
        }
    }

    /// Seed the input variables
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Record a completed node's output
    pub fn set_output(&mut self, node_id: impl Into<String>, output: Value) {
        self.outputs.insert(node_id.into(), output);
    }

    /// Output of a completed node
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// An input variable
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}
