//! Schema versioning for the audit database.
//!
//! Forward-only migrations recorded in `schema_versions`.

use crate::error::{GraderError, Result};
use sqlx::sqlite::SqlitePool;
use tracing::info;

const CURRENT_VERSION: i32 = 1;

/// Runs all pending migrations on the database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    ensure_schema_versions_table(pool).await?;

    let current = get_current_version(pool).await?;

    if current > CURRENT_VERSION {
        return Err(GraderError::persistence(format!(
            "Audit log schema version ({current}) is newer than supported version ({CURRENT_VERSION})"
        )));
    }

    if current < CURRENT_VERSION {
        info!("Migrating audit log from version {current} to {CURRENT_VERSION}");
        for version in (current + 1)..=CURRENT_VERSION {
            run_migration(pool, version).await?;
            record_version(pool, version).await?;
            info!("Applied audit log migration v{version}");
        }
    }

    Ok(())
}

async fn ensure_schema_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        GraderError::persistence(format!("Failed to create schema_versions table: {e}"))
    })?;

    Ok(())
}

async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| GraderError::persistence(format!("Failed to get schema version: {e}")))?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

async fn record_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| GraderError::persistence(format!("Failed to record migration: {e}")))?;
    Ok(())
}

async fn run_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        _ => Err(GraderError::persistence(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: submission records.
async fn migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            user_query TEXT NOT NULL,
            is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
            execution_time_ms INTEGER NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        GraderError::persistence(format!("Failed to create query_executions table: {e}"))
    })?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_query_executions_task
        ON query_executions(task_id, created_at)
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| GraderError::persistence(format!("Failed to create audit index: {e}")))?;

    Ok(())
}
