//! Error types for the store crate

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while opening or migrating the database
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or migration failure
    #[error("Database error: {0}")]
    Database(String),

    /// Query failure
    #[error("Query error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Row payload could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
