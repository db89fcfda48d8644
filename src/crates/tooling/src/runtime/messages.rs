//! Request/response messages for the command executor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One command execution request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Executor backend ("shell", "docker", ...)
    pub executor: String,

    /// Command line to run
    pub command: String,

    /// Working directory, executor default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment variables added to the command's environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Command timeout in seconds, executor default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Container image for container executors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CommandRequest {
    /// Create a shell command request
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            executor: "shell".to_string(),
            command: command.into(),
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
            image: None,
        }
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the environment variables
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the command timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Outcome of one command execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Process exit code
    pub exit_code: i32,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Wall-clock duration in milliseconds
    pub duration: u64,
}

impl ExecutionResult {
    /// Whether the command exited with status zero
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}
