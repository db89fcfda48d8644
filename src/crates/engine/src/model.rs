//! Workflow, run, and node definitions
//!
//! Core data model: immutable workflow definitions, per-execution Run and
//! RunNode records with monotonic status lattices, and the typed node
//! configurations parsed out of the free-form `config` payloads.

use crate::error::{EngineError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Node kind, selecting the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Chat completion against the LLM gateway
    Llm,
    /// Shell/container command via the executor service
    Tool,
    /// Pause for human approval
    Human,
    /// Tool call against a registered tool server
    Mcp,
}

impl NodeKind {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Human => "human",
            Self::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One workflow node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node id, unique within the workflow
    pub id: String,

    /// Executor discriminator
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Kind-specific configuration, parsed via [`NodeConfig::parse`]
    #[serde(default)]
    pub config: Value,

    /// Ids of nodes that must complete before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Attempt-count override for this node (inclusive of the first)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// An explicit edge declaration; `to` depends on `from`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node
    pub from: String,
    /// Downstream node
    pub to: String,
    /// Edge condition, stored but not evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Declared workflow input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Loose type name: "string", "number", "boolean", "object", "array"
    #[serde(rename = "type")]
    pub value_type: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the input must be supplied at run creation
    #[serde(default)]
    pub required: bool,

    /// Value used when an optional input is not supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// An immutable workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable workflow id
    pub id: String,

    /// Display name
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Definition version
    #[serde(default)]
    pub version: String,

    /// Declared inputs schema
    #[serde(default)]
    pub inputs: HashMap<String, InputSpec>,

    /// Static variables merged under the run's variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Map<String, Value>>,

    /// Nodes; order is informational, scheduling obeys the DAG
    pub nodes: Vec<Node>,

    /// Explicit edges, merged with per-node dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Dependency sets per node, merging `dependencies` lists with `edges`.
    ///
    /// Sets are ordered for deterministic traversal.
    pub fn dependency_map(&self) -> HashMap<String, BTreeSet<String>> {
        let mut map: HashMap<String, BTreeSet<String>> = self
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.dependencies.iter().cloned().collect()))
            .collect();

        for edge in &self.edges {
            map.entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
        }
        map
    }

    /// Validate run inputs against the declared schema and apply defaults.
    ///
    /// Missing required inputs are a validation error; declared optional
    /// inputs fall back to their defaults; loose type names are checked
    /// when declared. Static `vars` seed the result under their own names
    /// and are overridden by inputs of the same name.
    pub fn seed_inputs(&self, inputs: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut seeded = self.vars.clone().unwrap_or_default();

        for (name, spec) in &self.inputs {
            match inputs.get(name) {
                Some(value) => {
                    if !type_matches(&spec.value_type, value) {
                        return Err(EngineError::Validation(format!(
                            "Input '{}' is not of type '{}'",
                            name, spec.value_type
                        )));
                    }
                    seeded.insert(name.clone(), value.clone());
                }
                None => match (&spec.default, spec.required) {
                    (Some(default), _) => {
                        seeded.insert(name.clone(), default.clone());
                    }
                    (None, true) => {
                        return Err(EngineError::Validation(format!(
                            "Required input '{}' is missing",
                            name
                        )));
                    }
                    (None, false) => {}
                },
            }
        }

        // Undeclared inputs pass through untouched.
        for (name, value) in inputs {
            seeded.entry(name.clone()).or_insert_with(|| value.clone());
        }

        Ok(seeded)
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

/// Typed node configuration, parsed at validation time
#[derive(Debug, Clone)]
pub enum NodeConfig {
    /// Config of an llm node
    Llm(LlmNodeConfig),
    /// Config of a tool node
    Tool(ToolNodeConfig),
    /// Config of a human node
    Human(HumanNodeConfig),
    /// Config of an mcp node
    Mcp(McpNodeConfig),
}

impl NodeConfig {
    /// Parse a node's free-form config against its kind
    pub fn parse(node: &Node) -> Result<Self> {
        let config = node.config.clone();
        let parsed = match node.kind {
            NodeKind::Llm => Self::Llm(
                serde_json::from_value(config)
                    .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?,
            ),
            NodeKind::Tool => Self::Tool(
                serde_json::from_value(config)
                    .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?,
            ),
            NodeKind::Human => Self::Human(
                serde_json::from_value(config)
                    .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?,
            ),
            NodeKind::Mcp => Self::Mcp(
                serde_json::from_value(config)
                    .map_err(|e| EngineError::configuration(&node.id, e.to_string()))?,
            ),
        };
        Ok(parsed)
    }
}

/// One message template of an llm node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// Message role
    pub role: String,
    /// Message content; may contain `${...}` templates
    pub content: String,
}

/// Config of an llm node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmNodeConfig {
    /// Model identifier
    pub model: String,
    /// Conversation messages
    pub messages: Vec<LlmMessage>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Completion token limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool definitions offered to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

/// Config of a tool node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolNodeConfig {
    /// Executor backend; defaults to "shell"
    #[serde(default = "default_executor")]
    pub executor: String,
    /// Command line; may contain `${...}` templates
    pub command: String,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables; values may contain templates
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Command timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Container image for container executors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_executor() -> String {
    "shell".to_string()
}

/// Config of a human node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanNodeConfig {
    /// Prompt shown to approvers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Approvers allowed to resolve the node (informational)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    /// Approval deadline in seconds; waits indefinitely when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Config of an mcp node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpNodeConfig {
    /// Explicit server id; auto-discovery by tool name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Tool name
    pub tool: String,
    /// Tool arguments; values may contain templates
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Run status lattice: queued → running → {waiting ↔ running} →
/// {completed | failed | cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet scheduled
    Queued,
    /// Scheduler loop active
    Running,
    /// Suspended on a human approval
    Waiting,
    /// All nodes completed
    Completed,
    /// A node failed, or the run got stuck
    Failed,
    /// Cancel requested and honored
    Cancelled,
}

impl RunStatus {
    /// Stable string form used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status ends the lattice
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "waiting" => Self::Waiting,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Queued,
        }
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Globally unique run id
    pub id: String,

    /// Executed workflow
    pub workflow_id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Current status
    pub status: RunStatus,

    /// Inputs the run was created with
    pub inputs: Map<String, Value>,

    /// Terminal error message, set when status is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When execution began (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    /// When the run reached a terminal status (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,

    /// Creation time (Unix seconds)
    pub created_at: i64,
}

impl Run {
    /// Create a queued run
    pub fn new(
        workflow_id: impl Into<String>,
        tenant_id: impl Into<String>,
        inputs: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            tenant_id: tenant_id.into(),
            status: RunStatus::Queued,
            inputs,
            error: None,
            started_at: None,
            ended_at: None,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// RunNode status lattice: pending → running → {completed | failed |
/// skipped}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunNodeStatus {
    /// Recorded but not yet attempted
    Pending,
    /// Attempt in flight
    Running,
    /// Produced an output
    Completed,
    /// Exhausted its attempts
    Failed,
    /// Never became runnable
    Skipped,
}

impl RunNodeStatus {
    /// Stable string form used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunNodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RunNodeStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// Persisted execution record of one (run, node) pair.
///
/// Created lazily on the node's first persisted transition; one row per
/// pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNode {
    /// Row id
    pub id: String,
    /// Owning run
    pub run_id: String,
    /// Node within the workflow
    pub node_id: String,
    /// Node kind at execution time
    pub kind: NodeKind,
    /// Current status
    pub status: RunNodeStatus,
    /// Output value, set when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message, set when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Configured attempt count (inclusive of the first)
    pub retries: u32,
    /// When the first attempt started (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// When the node reached a terminal status (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Row creation time (Unix seconds)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        serde_json::from_value(json!({
            "id": "wf-1",
            "name": "sample",
            "version": "1",
            "inputs": {
                "topic": {"type": "string", "required": true},
                "limit": {"type": "number", "required": false, "default": 10}
            },
            "nodes": [
                {"id": "a", "type": "llm", "config": {
                    "model": "gpt-4",
                    "messages": [{"role": "user", "content": "write about ${variables.topic}"}]
                }},
                {"id": "b", "type": "tool", "config": {"command": "echo done"}, "dependencies": ["a"]}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_workflow_deserializes_wire_format() {
        let workflow = sample_workflow();
        assert_eq!(workflow.nodes.len(), 2);
        assert_eq!(workflow.nodes[0].kind, NodeKind::Llm);
        assert_eq!(workflow.nodes[1].dependencies, vec!["a"]);
        assert!(workflow.inputs["topic"].required);
    }

    #[test]
    fn test_dependency_map_merges_edges() {
        let workflow = sample_workflow();
        let deps = workflow.dependency_map();
        assert!(deps["a"].is_empty());
        // The explicit edge duplicates the declared dependency; sets dedup.
        assert_eq!(deps["b"].len(), 1);
        assert!(deps["b"].contains("a"));
    }

    #[test]
    fn test_seed_inputs_applies_defaults_and_requires() {
        let workflow = sample_workflow();

        let mut provided = Map::new();
        provided.insert("topic".to_string(), json!("rust"));
        let seeded = workflow.seed_inputs(&provided).unwrap();
        assert_eq!(seeded["topic"], "rust");
        assert_eq!(seeded["limit"], 10);

        let missing = workflow.seed_inputs(&Map::new());
        assert!(matches!(missing, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_seed_inputs_checks_types() {
        let workflow = sample_workflow();
        let mut provided = Map::new();
        provided.insert("topic".to_string(), json!(42));
        assert!(workflow.seed_inputs(&provided).is_err());
    }

    #[test]
    fn test_node_config_parses_by_kind() {
        let workflow = sample_workflow();
        match NodeConfig::parse(&workflow.nodes[0]).unwrap() {
            NodeConfig::Llm(config) => {
                assert_eq!(config.model, "gpt-4");
                assert_eq!(config.messages.len(), 1);
            }
            other => panic!("unexpected config: {:?}", other),
        }
        match NodeConfig::parse(&workflow.nodes[1]).unwrap() {
            NodeConfig::Tool(config) => {
                assert_eq!(config.executor, "shell");
                assert_eq!(config.command, "echo done");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_node_config_rejects_mismatched_payload() {
        let node = Node {
            id: "bad".to_string(),
            kind: NodeKind::Llm,
            config: json!({"command": "echo"}),
            dependencies: Vec::new(),
            retries: None,
        };
        assert!(matches!(
            NodeConfig::parse(&node),
            Err(EngineError::Configuration { .. })
        ));
    }

    #[test]
    fn test_status_roundtrips() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Waiting,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::from(status.as_str()), status);
        }
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());

        for status in [
            RunNodeStatus::Pending,
            RunNodeStatus::Running,
            RunNodeStatus::Completed,
            RunNodeStatus::Failed,
            RunNodeStatus::Skipped,
        ] {
            assert_eq!(RunNodeStatus::from(status.as_str()), status);
        }
    }
}
