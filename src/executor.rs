//! Query execution with timing and error classification.
//!
//! Wraps a [`QueryRunner`] so that every run, successful or not, comes
//! back as an [`ExecutionOutcome`] value with its elapsed time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::debug;

use crate::db::{QueryRunner, SchemaContext, TabularResult};
use crate::guard::ValidatedQuery;

/// Classification of a failed execution.
///
/// The kind drives automated hints downstream; the message is kept for
/// display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed SQL, unknown table or column, permission problems.
    Syntax,
    /// Connection loss, timeouts, resource limits, read-only violations.
    Operational,
    /// Type conversion and value range problems.
    Data,
    Other,
}

impl ErrorKind {
    /// Prefix shown in front of the database message.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Syntax => "SQL Syntax Error",
            Self::Operational => "Database Error",
            Self::Data => "Data Error",
            Self::Other => "Execution Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified execution failure reported by a [`QueryRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Result of executing one query.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success {
        result: TabularResult,
        elapsed_ms: u64,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        elapsed_ms: u64,
    },
}

impl ExecutionOutcome {
    /// Wall-clock time of the run, including fetching rows.
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            Self::Success { elapsed_ms, .. } | Self::Failure { elapsed_ms, .. } => *elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Student-facing text for a failure, e.g. `SQL Syntax Error: ...`.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, message, .. } => Some(format!("{}: {}", kind.label(), message)),
        }
    }
}

/// Executes validated queries and measures them.
pub struct Executor<'a> {
    runner: &'a dyn QueryRunner,
}

impl<'a> Executor<'a> {
    /// Creates a new executor over the given runner.
    pub fn new(runner: &'a dyn QueryRunner) -> Self {
        Self { runner }
    }

    /// Runs the query in a read-only transaction and captures the outcome.
    ///
    /// Never fails: database errors become [`ExecutionOutcome::Failure`].
    pub async fn execute(&self, query: &ValidatedQuery, context: &SchemaContext) -> ExecutionOutcome {
        let start = Instant::now();
        let result = self.runner.run_read_only(query, context).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                debug!(
                    "Query returned {} rows in {}ms",
                    result.row_count(),
                    elapsed_ms
                );
                ExecutionOutcome::Success { result, elapsed_ms }
            }
            Err(ExecutionError { kind, message }) => {
                debug!("Query failed after {}ms ({:?}): {}", elapsed_ms, kind, message);
                ExecutionOutcome::Failure {
                    kind,
                    message,
                    elapsed_ms,
                }
            }
        }
    }
}
