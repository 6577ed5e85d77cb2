//! Audit record storage with retention management.

use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

const MAX_AUDIT_ENTRIES: i64 = 5000;
const MAX_AUDIT_DAYS: i64 = 90;

/// Fields persisted for one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task_id: i64,
    pub user_query: String,
    pub is_correct: bool,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
}

/// A stored audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub task_id: i64,
    pub user_query: String,
    pub is_correct: bool,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
struct AuditEntryRow {
    id: i64,
    task_id: i64,
    user_query: String,
    is_correct: i64,
    execution_time_ms: i64,
    error_message: Option<String>,
    created_at: String,
}

impl From<AuditEntryRow> for AuditEntry {
    fn from(row: AuditEntryRow) -> Self {
        Self {
            id: row.id,
            task_id: row.task_id,
            user_query: row.user_query,
            is_correct: row.is_correct != 0,
            execution_time_ms: row.execution_time_ms,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

/// Filter options for listing audit records.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub task_id: Option<i64>,
    pub limit: Option<i64>,
}

pub(super) async fn insert(pool: &SqlitePool, record: &AuditRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO query_executions
        (task_id, user_query, is_correct, execution_time_ms, error_message)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.task_id)
    .bind(&record.user_query)
    .bind(record.is_correct)
    .bind(i64::try_from(record.execution_time_ms).unwrap_or(i64::MAX))
    .bind(record.error_message.as_deref())
    .execute(pool)
    .await
    .map_err(|e| GraderError::persistence(format!("Failed to record verification: {e}")))?;

    let id = result.last_insert_rowid();

    prune_old_entries(pool).await?;

    Ok(id)
}

/// Deletes records older than the retention window, then the oldest
/// records beyond the row limit.
async fn prune_old_entries(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM query_executions
        WHERE created_at < datetime('now', ? || ' days')
        "#,
    )
    .bind(-MAX_AUDIT_DAYS)
    .execute(pool)
    .await
    .map_err(|e| GraderError::persistence(format!("Failed to prune old records: {e}")))?;

    sqlx::query(
        r#"
        DELETE FROM query_executions
        WHERE id NOT IN (
            SELECT id FROM query_executions
            ORDER BY id DESC
            LIMIT ?
        )
        "#,
    )
    .bind(MAX_AUDIT_ENTRIES)
    .execute(pool)
    .await
    .map_err(|e| GraderError::persistence(format!("Failed to prune excess records: {e}")))?;

    Ok(())
}

pub(super) async fn list(pool: &SqlitePool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut query = String::from(
        r#"
        SELECT id, task_id, user_query, is_correct, execution_time_ms,
               error_message, created_at
        FROM query_executions
        WHERE 1=1
        "#,
    );

    if filter.task_id.is_some() {
        query.push_str(" AND task_id = ?");
    }

    query.push_str(" ORDER BY created_at DESC, id DESC");

    if filter.limit.is_some() {
        query.push_str(" LIMIT ?");
    }

    let mut sqlx_query = sqlx::query_as::<_, AuditEntryRow>(&query);

    if let Some(task_id) = filter.task_id {
        sqlx_query = sqlx_query.bind(task_id);
    }
    if let Some(limit) = filter.limit {
        sqlx_query = sqlx_query.bind(limit);
    }

    let rows = sqlx_query
        .fetch_all(pool)
        .await
        .map_err(|e| GraderError::persistence(format!("Failed to list audit records: {e}")))?;

    Ok(rows.into_iter().map(AuditEntry::from).collect())
}

pub(super) async fn count(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM query_executions")
        .fetch_one(pool)
        .await
        .map_err(|e| GraderError::persistence(format!("Failed to count audit records: {e}")))?;

    Ok(count)
}
