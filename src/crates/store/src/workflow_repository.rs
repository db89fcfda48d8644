//! Repository for workflow definitions
//!
//! Definitions are persisted verbatim as JSON in the `definition` column;
//! name/description/version are denormalized for listing.

use crate::db::Database;
use chrono::Utc;
use engine::persistence::WorkflowStore;
use engine::{EngineError, Workflow};
use sqlx::Row;
use std::sync::Arc;

/// SQLite implementation of [`WorkflowStore`]
#[derive(Clone, Debug)]
pub struct WorkflowRepository {
    db: Arc<Database>,
}

impl WorkflowRepository {
    /// Create a repository over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn persistence(e: impl std::fmt::Display) -> EngineError {
    EngineError::Persistence(e.to_string())
}

#[async_trait::async_trait]
impl WorkflowStore for WorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> engine::Result<()> {
        let definition = serde_json::to_string(workflow).map_err(persistence)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO workflows (id, name, description, version, definition, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 version = excluded.version,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at",
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.version)
        .bind(definition)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn load_workflow(&self, workflow_id: &str) -> engine::Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(persistence)?;

        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(
                    serde_json::from_str(&definition).map_err(persistence)?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self) -> engine::Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY created_at")
            .fetch_all(self.db.pool())
            .await
            .map_err(persistence)?;

        rows.iter()
            .map(|row| {
                let definition: String = row.get("definition");
                serde_json::from_str(&definition).map_err(persistence)
            })
            .collect()
    }

    async fn delete_workflow(&self, workflow_id: &str) -> engine::Result<()> {
        sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .execute(self.db.pool())
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
