//! Shared runtime utilities for the strand workspace
//!
//! This crate provides common functionality used across the strand
//! workspace crates.
//!
//! # Modules
//!
//! - `async_utils` - Retry policies and timeout utilities for async operations
//! - `config` - Environment variable loading helpers
//! - `logging` - Tracing subscriber initialization
//! - `pending` - Correlation-keyed completion handles (approval and RPC waits)
//! - `runtime` - Command-runner collaborator interface

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod pending;
pub mod runtime;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// General error with message
    #[error("Tooling error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;
