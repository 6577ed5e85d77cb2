//! Audit log for graded submissions.
//!
//! Stores one row per verification in a local SQLite database, separate
//! from the read-only pool used to run queries.

mod migrations;
mod records;

pub use records::{AuditEntry, AuditFilter, AuditRecord};

use crate::error::{GraderError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

/// Handle to the audit database.
pub struct AuditLog {
    pool: SqlitePool,
    path: PathBuf,
}

impl AuditLog {
    /// Opens or creates the audit database at `path` and applies migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::ensure_parent_dirs(path)?;

        let mut last_error = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt)))
                    .await;
            }

            match Self::connect(path).await {
                Ok(pool) => {
                    migrations::run_migrations(&pool).await?;
                    info!("Audit log opened at {}", path.display());
                    return Ok(Self {
                        pool,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    debug!("Audit log open attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| GraderError::persistence("Failed to open audit log after retries")))
    }

    /// Creates a connection pool to the SQLite database.
    async fn connect(path: &Path) -> Result<SqlitePool> {
        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| GraderError::persistence(format!("Invalid audit log path: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| GraderError::persistence(format!("Failed to open audit log: {e}")))
    }

    fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GraderError::persistence(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Stores a verification record and prunes old ones. Returns the row id.
    pub async fn record(&self, record: &AuditRecord) -> Result<i64> {
        records::insert(&self.pool, record).await
    }

    /// Lists stored records, newest first.
    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        records::list(&self.pool, filter).await
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<i64> {
        records::count(&self.pool).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
