//! Error types for the grader.
//!
//! Defines the fault enum used outside the student-facing path. Student
//! mistakes (rejected queries, failed execution, mismatched results) are
//! ordinary values in a [`VerificationReport`](crate::verify::VerificationReport),
//! not errors.

use thiserror::Error;

/// Main error type for grader operations.
#[derive(Error, Debug)]
pub enum GraderError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Task catalog errors (unknown task, malformed catalog file).
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The reference query of a task was rejected or failed to execute.
    ///
    /// This is an operator-facing fault: the catalog is broken, not the
    /// student's query.
    #[error("Reference query for task {task_id} failed: {message}")]
    ReferenceQuery { task_id: i64, message: String },

    /// Audit log storage errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraderError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a catalog error with the given message.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Creates a reference query fault for the given task.
    pub fn reference_query(task_id: i64, msg: impl Into<String>) -> Self {
        Self::ReferenceQuery {
            task_id,
            message: msg.into(),
        }
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Config(_) => "Configuration Error",
            Self::Catalog(_) => "Catalog Error",
            Self::ReferenceQuery { .. } => "Internal Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for faults that must never be shown verbatim to a student.
    pub fn is_internal_fault(&self) -> bool {
        matches!(self, Self::ReferenceQuery { .. } | Self::Internal(_))
    }
}

/// Result type alias using GraderError.
pub type Result<T> = std::result::Result<T, GraderError>;
