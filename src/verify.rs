//! Verification of a submitted query against a task's reference query.
//!
//! Runs the submission through the guard and executor first; only if it
//! executes does the reference query run, and the two results are then
//! compared. Student mistakes end up in the report. A broken reference
//! query is a fault of the catalog and comes back as an error.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::audit::AuditRecord;
use crate::catalog::Task;
use crate::compare::{compare, Verdict};
use crate::config::{Config, LimitsConfig};
use crate::db::{format_tables_for_hint, QueryRunner, SchemaContext, TabularResult};
use crate::error::{GraderError, Result};
use crate::executor::{ErrorKind, ExecutionOutcome, Executor};
use crate::guard::{check_length, Guard, RejectionReason, ValidatedQuery};

/// Why a submission was not graded correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Refused by the guard or length check; never executed.
    Rejected,
    Syntax,
    Operational,
    Data,
    Other,
    /// Executed, but the result differs from the reference.
    Mismatch,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Syntax => Self::Syntax,
            ErrorKind::Operational => Self::Operational,
            ErrorKind::Data => Self::Data,
            ErrorKind::Other => Self::Other,
        }
    }
}

type Records = Vec<serde_json::Map<String, serde_json::Value>>;

/// Outcome of one verification, ready to serialize for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub is_correct: bool,
    /// Submitted result as records, capped at `limits.max_result_rows`.
    pub user_data: Records,
    pub expected_data: Records,
    pub user_columns: Vec<String>,
    pub expected_columns: Vec<String>,
    /// Diagnostic for the student; `None` when correct.
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    /// Elapsed time of the submitted query.
    pub execution_time_ms: u64,
    /// Full row count of the submitted result, before capping.
    pub row_count: usize,
    pub expected_row_count: usize,
}

impl VerificationReport {
    fn rejected(reason: &RejectionReason) -> Self {
        Self::failed(reason.to_string(), FailureKind::Rejected, 0)
    }

    fn failed(message: String, kind: FailureKind, execution_time_ms: u64) -> Self {
        Self {
            is_correct: false,
            user_data: Vec::new(),
            expected_data: Vec::new(),
            user_columns: Vec::new(),
            expected_columns: Vec::new(),
            error_message: Some(message),
            error_kind: Some(kind),
            execution_time_ms,
            row_count: 0,
            expected_row_count: 0,
        }
    }

    fn graded(
        actual: &TabularResult,
        expected: &TabularResult,
        verdict: &Verdict,
        execution_time_ms: u64,
        max_rows: usize,
    ) -> Self {
        let is_correct = verdict.is_equal();
        Self {
            is_correct,
            user_data: actual.to_records(max_rows),
            expected_data: expected.to_records(max_rows),
            user_columns: actual.columns.clone(),
            expected_columns: expected.columns.clone(),
            error_message: (!is_correct).then(|| verdict.message()),
            error_kind: (!is_correct).then_some(FailureKind::Mismatch),
            execution_time_ms,
            row_count: actual.row_count(),
            expected_row_count: expected.row_count(),
        }
    }

    /// The fields the caller persists for this submission.
    pub fn audit_record(&self, task_id: i64, query: &str) -> AuditRecord {
        AuditRecord {
            task_id,
            user_query: query.to_string(),
            is_correct: self.is_correct,
            execution_time_ms: self.execution_time_ms,
            error_message: self.error_message.clone(),
        }
    }
}

/// Grades submissions. Holds no per-request state and can be shared
/// across tasks behind an `Arc`.
pub struct Verifier {
    runner: Arc<dyn QueryRunner>,
    guard: Guard,
    limits: LimitsConfig,
    schemas: HashMap<String, SchemaContext>,
}

impl Verifier {
    /// Creates a verifier with default limits and the lexical guard.
    pub fn new(runner: Arc<dyn QueryRunner>) -> Self {
        Self {
            runner,
            guard: Guard::default(),
            limits: LimitsConfig::default(),
            schemas: HashMap::new(),
        }
    }

    /// Creates a verifier using the guard, limits and schema mapping from
    /// configuration.
    pub fn from_config(runner: Arc<dyn QueryRunner>, config: &Config) -> Result<Self> {
        let mut verifier = Self::new(runner)
            .with_guard(Guard::new(config.guard.strict_parse))
            .with_limits(config.limits.clone());
        for (tag, schema) in &config.catalog.schemas {
            verifier = verifier.with_schema(tag, SchemaContext::search_path(schema)?);
        }
        Ok(verifier)
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Maps a task's `database_schema` tag to a schema context.
    pub fn with_schema(mut self, tag: &str, context: SchemaContext) -> Self {
        self.schemas.insert(tag.to_string(), context);
        self
    }

    /// Schema context a task's queries run in. Unmapped tags use the
    /// default search path.
    pub fn schema_context(&self, task: &Task) -> SchemaContext {
        self.schemas
            .get(&task.database_schema)
            .cloned()
            .unwrap_or_default()
    }

    /// Grades `query` against the task's reference query.
    ///
    /// Returns `Err` only for faults outside the student's control, such as
    /// a reference query that is rejected or fails to execute.
    pub async fn verify(&self, task: &Task, query: &str) -> Result<VerificationReport> {
        let query = query.trim();
        let context = self.schema_context(task);
        let executor = Executor::new(self.runner.as_ref());

        let submitted = match self.admit(query) {
            Ok(validated) => validated,
            Err(reason) => {
                debug!("Task {}: submission rejected: {reason}", task.task_id);
                return Ok(VerificationReport::rejected(&reason));
            }
        };

        let (actual, elapsed_ms) = match executor.execute(&submitted, &context).await {
            ExecutionOutcome::Success { result, elapsed_ms } => (result, elapsed_ms),
            ExecutionOutcome::Failure {
                kind,
                message,
                elapsed_ms,
            } => {
                debug!("Task {}: submission failed ({kind:?})", task.task_id);
                return Ok(VerificationReport::failed(
                    format!("{}: {}", kind.label(), message),
                    kind.into(),
                    elapsed_ms,
                ));
            }
        };

        let expected = self.run_reference(task, &executor, &context).await?;

        let verdict = compare(&actual, &expected);
        info!(
            "Task {}: graded {} in {}ms",
            task.task_id,
            if verdict.is_equal() { "correct" } else { "incorrect" },
            elapsed_ms
        );
        if let Some(mismatch) = verdict.mismatch() {
            debug!("Task {}: {:?}", task.task_id, mismatch);
        }

        Ok(VerificationReport::graded(
            &actual,
            &expected,
            &verdict,
            elapsed_ms,
            self.limits.max_result_rows,
        ))
    }

    /// Describes the task's tables in the format used for hints.
    pub async fn schema_hint(&self, task: &Task) -> Result<String> {
        let tables = self
            .runner
            .describe_tables(&task.tables_involved, &self.schema_context(task))
            .await?;
        Ok(format_tables_for_hint(&tables))
    }

    fn admit(&self, query: &str) -> std::result::Result<ValidatedQuery, RejectionReason> {
        check_length(query, self.limits.max_query_length)?;
        self.guard.check(query)
    }

    async fn run_reference(
        &self,
        task: &Task,
        executor: &Executor<'_>,
        context: &SchemaContext,
    ) -> Result<TabularResult> {
        let reference = self.admit(task.gold_query.trim()).map_err(|reason| {
            error!("Reference query for task {} rejected: {reason}", task.task_id);
            GraderError::reference_query(task.task_id, reason.to_string())
        })?;

        match executor.execute(&reference, context).await {
            ExecutionOutcome::Success { result, .. } => Ok(result),
            ExecutionOutcome::Failure { kind, message, .. } => {
                error!(
                    "Reference query for task {} failed: {}: {}",
                    task.task_id,
                    kind.label(),
                    message
                );
                Err(GraderError::reference_query(
                    task.task_id,
                    format!("{}: {}", kind.label(), message),
                ))
            }
        }
    }
}
