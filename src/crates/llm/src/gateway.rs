//! HTTP client for a remote completion gateway

use crate::{ChatModel, ChatRequest, ChatResponse, LlmError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin HTTP client implementing [`ChatModel`] against a completion gateway.
///
/// Each [`complete`](ChatModel::complete) call is one POST of the
/// [`ChatRequest`] JSON; the response body is the [`ChatResponse`] JSON.
pub struct HttpChatGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatGateway {
    /// Create a gateway client posting to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    /// Attach a bearer token sent with each request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl ChatModel for HttpChatGateway {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Issuing completion request"
        );

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!(
                "Gateway returned {}: {}",
                status, body
            )));
        }

        let completion = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| LlmError::Transport(format!("Invalid gateway response: {}", e)))?;

        debug!(
            id = %completion.id,
            finish_reason = %completion.finish_reason,
            total_tokens = completion.usage.total_tokens,
            "Completion received"
        );

        Ok(completion)
    }
}
