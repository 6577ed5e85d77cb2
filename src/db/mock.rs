//! Mock query runner for testing.
//!
//! Returns scripted results keyed by SQL text and records every call, so
//! tests can assert that a query never reached the database.

use super::{QueryRunner, SchemaContext, TableDescription, TabularResult};
use crate::error::Result;
use crate::executor::{ErrorKind, ExecutionError};
use crate::guard::ValidatedQuery;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A mock runner that returns predefined results.
#[derive(Default)]
pub struct MockRunner {
    responses: HashMap<String, std::result::Result<TabularResult, ExecutionError>>,
    tables: Vec<TableDescription>,
    calls: Mutex<Vec<(String, SchemaContext)>>,
}

impl MockRunner {
    /// Creates a mock runner with no scripted queries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a successful result for `sql` (matched after trimming).
    pub fn with_result(mut self, sql: &str, result: TabularResult) -> Self {
        self.responses.insert(sql.trim().to_string(), Ok(result));
        self
    }

    /// Scripts a failure for `sql` (matched after trimming).
    pub fn with_error(mut self, sql: &str, kind: ErrorKind, message: &str) -> Self {
        self.responses
            .insert(sql.trim().to_string(), Err(ExecutionError::new(kind, message)));
        self
    }

    /// Sets the tables returned by schema introspection.
    pub fn with_tables(mut self, tables: Vec<TableDescription>) -> Self {
        self.tables = tables;
        self
    }

    /// Number of queries that reached the runner.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// SQL text of every query that reached the runner, in order.
    pub fn queries(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(sql, _)| sql.clone()).collect())
            .unwrap_or_default()
    }

    /// Schema context of every query that reached the runner, in order.
    pub fn contexts(&self) -> Vec<SchemaContext> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(_, ctx)| ctx.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryRunner for MockRunner {
    async fn run_read_only(
        &self,
        query: &ValidatedQuery,
        context: &SchemaContext,
    ) -> std::result::Result<TabularResult, ExecutionError> {
        let sql = query.as_str().trim().to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((sql.clone(), context.clone()));
        }

        self.responses.get(&sql).cloned().unwrap_or_else(|| {
            Err(ExecutionError::new(
                ErrorKind::Other,
                format!("no mock result for: {sql}"),
            ))
        })
    }

    async fn describe_tables(
        &self,
        tables: &[String],
        _context: &SchemaContext,
    ) -> Result<Vec<TableDescription>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| tables.iter().any(|name| name.trim() == t.name))
            .cloned()
            .collect())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;
    use crate::guard::validate;

    #[tokio::test]
    async fn test_mock_scripted_select() {
        let runner = MockRunner::new().with_result(
            "SELECT 1",
            TabularResult::new(vec!["?column?".into()], vec![vec![Value::Int(1)]]).unwrap(),
        );
        let result = runner
            .run_read_only(&validate("SELECT 1").unwrap(), &SchemaContext::default())
            .await
            .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(runner.call_count(), 1);
        assert_eq!(runner.queries(), vec!["SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_unknown_query_fails() {
        let runner = MockRunner::new();
        let err = runner
            .run_read_only(&validate("SELECT 2").unwrap(), &SchemaContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
    }
}
