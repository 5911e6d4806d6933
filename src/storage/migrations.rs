//! Schema migration runner.
//!
//! Applies the named statements from [`super::schema`] in order, tracking
//! them in a `_migrations` version table so reruns are no-ops. Each
//! statement is applied inside its own transaction together with its
//! version record.

use sqlx::PgPool;
use thiserror::Error;

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Migration runner over a connection pool.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies all pending schema statements.
    pub async fn run(&self) -> Result<(), MigrationError> {
        self.ensure_version_table().await?;

        for (name, sql) in schema::all_statements() {
            if self.is_applied(name).await? {
                continue;
            }
            self.apply(name, sql).await?;
            tracing::info!(target: "storage", migration = name, "Applied migration");
        }
        Ok(())
    }

    /// Names of applied migrations, in application order.
    pub async fn applied(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_version_table().await?;
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM _migrations ORDER BY applied_at, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn ensure_version_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn apply(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::Failed {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::Failed {
            name: "create_alerts".to_string(),
            message: "syntax error".to_string(),
        };
        assert!(err.to_string().contains("create_alerts"));
        assert!(err.to_string().contains("syntax error"));
    }
}
