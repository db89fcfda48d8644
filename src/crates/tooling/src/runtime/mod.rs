//! Command-runner collaborator interface
//!
//! Workflow tool nodes execute shell or container commands through an
//! external executor service. This module defines the request/response
//! messages, the [`CommandRunner`] trait the engine consumes, and a thin
//! HTTP client implementation.

mod messages;

pub use messages::{CommandRequest, ExecutionResult};

use crate::{Result, ToolingError};
use async_trait::async_trait;
use std::time::Duration;

/// Executes commands on behalf of workflow tool nodes.
///
/// A non-zero exit code is a successful execution with a non-zero status;
/// implementations return `Err` only for transport failures or failures
/// reported by the executor service itself.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute one command and return its outcome
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult>;
}

/// HTTP client for a remote command-executor service.
///
/// Sends one POST per execution; the response body is the
/// [`ExecutionResult`] JSON.
pub struct HttpCommandRunner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCommandRunner {
    /// Create a runner posting to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Create a runner with a bounded per-request timeout
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolingError::General(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CommandRunner for HttpCommandRunner {
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolingError::General(format!("Executor request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolingError::General(format!(
                "Executor returned {}: {}",
                status, body
            )));
        }

        let result = response
            .json::<ExecutionResult>()
            .await
            .map_err(|e| ToolingError::General(format!("Invalid executor response: {}", e)))?;

        Ok(result)
    }
}
