use super::SqliteParameterStore;
use crate::error::{Result, TaskError};

impl SqliteParameterStore {
    /// Run database migrations
    pub(super) async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_parameters (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            TaskError::InvalidConfig(format!("Migration failed (task_parameters): {}", e))
        })?;

        Ok(())
    }
}
