//! Repository for registered tool servers
//!
//! The transport descriptor is persisted as its JSON tagged union;
//! server info and the cached tool catalog are JSON columns.

use crate::db::Database;
use chrono::Utc;
use mcp::persistence::ServerStore;
use mcp::types::{RegisteredServer, ServerStatus};
use mcp::McpError;
use sqlx::Row;
use std::sync::Arc;

/// SQLite implementation of [`ServerStore`]
#[derive(Clone, Debug)]
pub struct ServerRepository {
    db: Arc<Database>,
}

impl ServerRepository {
    /// Create a repository over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn persistence(e: impl std::fmt::Display) -> McpError {
    McpError::Persistence(e.to_string())
}

fn server_from_row(row: &sqlx::sqlite::SqliteRow) -> mcp::Result<RegisteredServer> {
    let transport: String = row.get("transport");
    let status: String = row.get("status");
    let server_info: Option<String> = row.get("server_info");
    let tools: Option<String> = row.get("tools");

    Ok(RegisteredServer {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        description: row.get("description"),
        transport: serde_json::from_str(&transport).map_err(persistence)?,
        status: ServerStatus::from(status.as_str()),
        server_info: server_info
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(persistence)?,
        tools: tools
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(persistence)?
            .unwrap_or_default(),
        error: row.get("error"),
        connected_at: row.get("connected_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait::async_trait]
impl ServerStore for ServerRepository {
    async fn save_server(&self, server: &RegisteredServer) -> mcp::Result<()> {
        let transport = serde_json::to_string(&server.transport)?;
        let server_info = server
            .server_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tools = if server.tools.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&server.tools)?)
        };

        sqlx::query(
            "INSERT INTO servers (id, tenant_id, name, description, transport, status,
                                  server_info, tools, error, connected_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 tenant_id = excluded.tenant_id,
                 name = excluded.name,
                 description = excluded.description,
                 transport = excluded.transport,
                 status = excluded.status,
                 server_info = excluded.server_info,
                 tools = excluded.tools,
                 error = excluded.error,
                 connected_at = excluded.connected_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&server.id)
        .bind(&server.tenant_id)
        .bind(&server.name)
        .bind(&server.description)
        .bind(transport)
        .bind(server.status.as_str())
        .bind(server_info)
        .bind(tools)
        .bind(&server.error)
        .bind(server.connected_at)
        .bind(server.created_at)
        .bind(server.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn update_server_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        error: Option<String>,
    ) -> mcp::Result<()> {
        sqlx::query("UPDATE servers SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(Utc::now().timestamp())
            .bind(server_id)
            .execute(self.db.pool())
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn load_servers(&self) -> mcp::Result<Vec<RegisteredServer>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, description, transport, status, server_info,
                    tools, error, connected_at, created_at, updated_at
               FROM servers ORDER BY created_at, id",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(persistence)?;

        rows.iter().map(server_from_row).collect()
    }

    async fn delete_server(&self, server_id: &str) -> mcp::Result<()> {
        sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(server_id)
            .execute(self.db.pool())
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
