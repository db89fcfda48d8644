//! Persistence boundary for server registrations
//!
//! The manager persists [`RegisteredServer`] records verbatim (with the
//! transport serialized as a tagged union) through this narrow trait; the
//! `store` crate provides the SQLite implementation.

use crate::types::{RegisteredServer, ServerStatus};
use crate::Result;
use async_trait::async_trait;

/// Repository for registered tool servers
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Insert or replace a server record
    async fn save_server(&self, server: &RegisteredServer) -> Result<()>;

    /// Update only the lifecycle state and error message of a record
    async fn update_server_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Load every persisted record
    async fn load_servers(&self) -> Result<Vec<RegisteredServer>>;

    /// Remove a record
    async fn delete_server(&self, server_id: &str) -> Result<()>;
}
