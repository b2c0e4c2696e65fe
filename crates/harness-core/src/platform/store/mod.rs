//! Parameter storage
//!
//! Tasks persist their current parameters as an opaque JSON blob keyed by
//! task name. The SQLite store keeps them across restarts; the in-memory store
//! backs tests and ephemeral runs.

mod memory;
mod migrations;


use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use crate::error::{Result, TaskError};

pub use memory::MemoryParameterStore;

/// Opaque key-value storage for persisted parameters
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Load the blob stored under `key`, if any
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous blob
    async fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the blob stored under `key`; unknown keys are ignored
    async fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-based parameter store
pub struct SqliteParameterStore {
    pub(super) pool: Pool<Sqlite>,
}

impl SqliteParameterStore {
    /// Create a new store from database path
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TaskError::InvalidConfig(format!("Failed to create directory: {}", e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }
}

#[async_trait]
impl ParameterStore for SqliteParameterStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM task_parameters WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_parameters (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_parameters WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
