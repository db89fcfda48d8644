//! LLM gateway collaborator interface
//!
//! The workflow engine is an orchestration system, not an LLM client
//! library: it consumes language models through the [`ChatModel`] trait and
//! stays provider-agnostic. This crate defines that trait, the
//! request/response types on its boundary, and [`HttpChatGateway`], a thin
//! HTTP client for a remote completion gateway.
//!
//! Share implementations across executors as `Arc<dyn ChatModel>`.

mod gateway;
mod types;

pub use gateway::HttpChatGateway;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Usage};

use async_trait::async_trait;
use thiserror::Error;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors returned by [`ChatModel`] implementations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Request could not reach the provider or the connection failed
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// Provider returned a well-formed error response
    #[error("LLM provider error: {0}")]
    Provider(String),

    /// Response could not be decoded
    #[error("LLM serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Chat-completion interface consumed by the workflow engine.
///
/// Implementations must be `Send + Sync`; the engine shares them across
/// concurrently executing nodes.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Issue a single completion request and return the full response
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;
}
