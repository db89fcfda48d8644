//! Database connection and migrations

use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Type alias for the connection pool
pub type DatabasePool = SqlitePool;

/// SQLite connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating if missing) the database at `path`
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_max_connections(path, 5).await
    }

    /// Open with a custom pool size
    pub async fn with_max_connections<P: AsRef<Path>>(
        path: P,
        max_connections: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        debug!(path = %path.display(), "Connecting to database");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Database connection established");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Open and migrate in one step
    pub async fn initialize<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply the embedded migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    /// Reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run a trivial query to verify the connection
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// A migrated in-memory database for tests.
    ///
    /// Pinned to one connection: every pooled connection of an in-memory
    /// SQLite database would otherwise see its own empty database.
    pub async fn test_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self {
            pool: Arc::new(pool),
        };
        db.run_migrations().await?;
        Ok(db)
    }
}
