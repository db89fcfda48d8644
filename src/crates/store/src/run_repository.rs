//! Repository for runs and per-node execution records

use crate::db::Database;
use chrono::Utc;
use engine::persistence::{NodeStateUpdate, RunStore};
use engine::{EngineError, Run, RunNode, RunNodeStatus, RunStatus};
use serde_json::{Map, Value};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

/// SQLite implementation of [`RunStore`]
#[derive(Clone, Debug)]
pub struct RunRepository {
    db: Arc<Database>,
}

impl RunRepository {
    /// Create a repository over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn persistence(e: impl std::fmt::Display) -> EngineError {
    EngineError::Persistence(e.to_string())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> engine::Result<Run> {
    let inputs: String = row.get("inputs");
    let inputs: Map<String, Value> = serde_json::from_str(&inputs).map_err(persistence)?;
    let status: String = row.get("status");

    Ok(Run {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        tenant_id: row.get("tenant_id"),
        status: RunStatus::from(status.as_str()),
        inputs,
        error: row.get("error"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        created_at: row.get("created_at"),
    })
}

fn run_node_from_row(row: &sqlx::sqlite::SqliteRow) -> engine::Result<RunNode> {
    let status: String = row.get("status");
    let kind: String = row.get("type");
    let kind = serde_json::from_value(Value::String(kind)).map_err(persistence)?;
    let output: Option<String> = row.get("outputs");
    let output = match output {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(persistence)?),
        None => None,
    };

    Ok(RunNode {
        id: row.get("id"),
        run_id: row.get("run_id"),
        node_id: row.get("node_id"),
        kind,
        status: RunNodeStatus::from(status.as_str()),
        output,
        error: row.get("error"),
        retries: row.get::<i64, _>("retries") as u32,
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait::async_trait]
impl RunStore for RunRepository {
    async fn save_run(&self, run: &Run) -> engine::Result<()> {
        let inputs = serde_json::to_string(&run.inputs).map_err(persistence)?;

        sqlx::query(
            "INSERT INTO runs (id, workflow_id, tenant_id, status, inputs, outputs, error,
                               started_at, ended_at, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(&run.tenant_id)
        .bind(run.status.as_str())
        .bind(inputs)
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.created_at)
        .execute(self.db.pool())
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: Option<i64>,
        error: Option<String>,
    ) -> engine::Result<bool> {
        // Compare-and-set: terminal statuses are never overwritten, so a
        // cancel racing natural termination keeps the first writer.
        let result = sqlx::query(
            "UPDATE runs
                SET status = ?,
                    started_at = CASE WHEN ? = 'running' AND started_at IS NULL
                                      THEN ? ELSE started_at END,
                    ended_at = COALESCE(?, ended_at),
                    error = COALESCE(?, error)
              WHERE id = ? AND status IN ('queued', 'running', 'waiting')",
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(ended_at)
        .bind(error)
        .bind(run_id)
        .execute(self.db.pool())
        .await
        .map_err(persistence)?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_run(&self, run_id: &str) -> engine::Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, tenant_id, status, inputs, error,
                    started_at, ended_at, created_at
               FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(persistence)?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn upsert_run_node(&self, update: &NodeStateUpdate) -> engine::Result<()> {
        let output = update
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(persistence)?;

        sqlx::query(
            "INSERT INTO run_nodes (id, run_id, node_id, type, status, inputs, outputs,
                                    error, retries, started_at, ended_at, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (run_id, node_id) DO UPDATE SET
                 status = excluded.status,
                 outputs = excluded.outputs,
                 error = excluded.error,
                 retries = excluded.retries,
                 started_at = COALESCE(run_nodes.started_at, excluded.started_at),
                 ended_at = excluded.ended_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&update.run_id)
        .bind(&update.node_id)
        .bind(update.kind.as_str())
        .bind(update.status.as_str())
        .bind(output)
        .bind(&update.error)
        .bind(update.retries as i64)
        .bind(update.started_at)
        .bind(update.ended_at)
        .bind(Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn load_run_nodes(&self, run_id: &str) -> engine::Result<Vec<RunNode>> {
        let rows = sqlx::query(
            "SELECT id, run_id, node_id, type, status, outputs, error, retries,
                    started_at, ended_at, created_at
               FROM run_nodes WHERE run_id = ? ORDER BY created_at",
        )
        .bind(run_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(persistence)?;

        rows.iter().map(run_node_from_row).collect()
    }

    async fn list_interrupted_runs(&self) -> engine::Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, tenant_id, status, inputs, error,
                    started_at, ended_at, created_at
               FROM runs
              WHERE status IN ('queued', 'running', 'waiting')
              ORDER BY created_at",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(persistence)?;

        rows.iter().map(run_from_row).collect()
    }
}
