//! Database access for the grader.
//!
//! Provides a trait-based interface over the read-only database, so the
//! executor can run against PostgreSQL or an in-memory mock.

mod mock;
mod postgres;
mod schema;
mod types;

pub use mock::MockRunner;
pub use postgres::PostgresRunner;
pub use schema::{format_tables_for_hint, ColumnDescription, TableDescription};
pub use types::{Row, ShapeError, TabularResult, Value};

use crate::error::{GraderError, Result};
use crate::executor::ExecutionError;
use crate::guard::ValidatedQuery;
use async_trait::async_trait;

/// Which sample schema a query runs against.
///
/// The default context leaves the role's search path untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    search_path: Option<String>,
}

impl SchemaContext {
    /// Creates a context that resolves unqualified names in `schema`.
    ///
    /// Only plain identifiers are accepted, since the name ends up in a
    /// `SET` statement. The name is folded to lowercase, as PostgreSQL
    /// does for unquoted identifiers.
    pub fn search_path(schema: &str) -> Result<Self> {
        if !is_plain_identifier(schema) {
            return Err(GraderError::config(format!(
                "Invalid schema name '{schema}': expected letters, digits and underscores"
            )));
        }
        Ok(Self {
            search_path: Some(schema.to_ascii_lowercase()),
        })
    }

    /// Returns the schema to put on the search path, if any.
    pub fn schema(&self) -> Option<&str> {
        self.search_path.as_deref()
    }
}

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read-only access to the sample databases.
///
/// Implementations must run every query in a transaction that cannot
/// write and is always rolled back.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Runs one validated query and fetches the full result set.
    async fn run_read_only(
        &self,
        query: &ValidatedQuery,
        context: &SchemaContext,
    ) -> std::result::Result<TabularResult, ExecutionError>;

    /// Returns column name, type and nullability for each named table.
    ///
    /// Tables are looked up in the context's schema, or on the default
    /// search path. Tables that do not exist are skipped.
    async fn describe_tables(
        &self,
        tables: &[String],
        context: &SchemaContext,
    ) -> Result<Vec<TableDescription>>;

    /// Releases the underlying connections.
    async fn close(&self);
}
