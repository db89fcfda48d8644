//! DAG workflow execution engine
//!
//! Executes user-defined DAG workflows whose nodes invoke language models,
//! run commands, call external tool servers, or pause for human approval.
//! The scheduler dispatches runnable nodes under a concurrency bound,
//! resolves cross-node variable references, retries with exponential
//! backoff, persists node state for crash recovery, streams typed
//! execution events, and supports cancellation, suspend-for-approval, and
//! resume-from-checkpoint.
//!
//! External collaborators (the LLM gateway, the command executor, tool
//! servers, and the relational store) are consumed through narrow traits;
//! see the `llm`, `tooling`, `mcp`, and `store` crates.

pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod model;
pub mod persistence;
pub mod resolver;
pub mod runs;
pub mod scheduler;

pub use config::EngineConfig;
pub use context::Context;
pub use error::{EngineError, Result};
pub use events::{EventBus, ExecutionEvent};
pub use executor::{
    ApprovalDecision, ExecutorRegistry, HumanExecutor, LlmExecutor, McpExecutor, NodeExecutor,
    NodeOutput, ToolExecutor,
};
pub use model::{
    Edge, HumanNodeConfig, InputSpec, LlmNodeConfig, McpNodeConfig, Node, NodeConfig, NodeKind,
    Run, RunNode, RunNodeStatus, RunStatus, ToolNodeConfig, Workflow,
};
pub use persistence::{NodeStateUpdate, RunStore, WorkflowStore};
pub use runs::RunManager;
pub use scheduler::{RunOutcome, WorkflowExecutor};
