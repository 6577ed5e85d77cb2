//! End-to-end verification tests against a scripted runner.

use pretty_assertions::assert_eq;
use query_grader::audit::{AuditFilter, AuditLog};
use query_grader::catalog::TaskCatalog;
use query_grader::db::{MockRunner, TabularResult, Value};
use query_grader::error::GraderError;
use query_grader::executor::ErrorKind;
use query_grader::guard::Guard;
use query_grader::verify::{FailureKind, Verifier};
use std::sync::Arc;

const CATALOG: &str = r#"
[[tasks]]
task_id = 1
title = "Select all customers"
category = "ecommerce"
database_schema = "ecommerce"
gold_query = "SELECT * FROM customers;"

[[tasks]]
task_id = 2
title = "Broken task"
category = "music"
database_schema = "music"
gold_query = "SELECT * FROM trakcs;"
"#;

fn customers() -> TabularResult {
    TabularResult::new(
        vec!["id".to_string(), "first_name".to_string(), "balance".to_string()],
        vec![
            vec![Value::Int(1), Value::from("Ann"), Value::Float(12.5)],
            vec![Value::Int(2), Value::from("Bob"), Value::Null],
            vec![Value::Int(3), Value::from("Cid"), Value::Float(0.1)],
        ],
    )
    .unwrap()
}

fn runner() -> MockRunner {
    let mut shuffled = customers();
    shuffled.rows.rotate_left(1);
    let mut numeric = customers();
    // 0.1 computed as 0.3 - 0.2
    numeric.rows[2][2] = Value::Float(0.3 - 0.2);

    MockRunner::new()
        .with_result("SELECT * FROM customers;", customers())
        .with_result("SELECT id, first_name, balance FROM customers", customers())
        .with_result("SELECT * FROM customers ORDER BY first_name DESC", shuffled)
        .with_result("SELECT id, first_name, (balance * 1.0) AS balance FROM customers", numeric)
        .with_result(
            "SELECT first_name, id, balance FROM customers",
            TabularResult::new(
                vec!["first_name".to_string(), "id".to_string(), "balance".to_string()],
                customers()
                    .rows
                    .into_iter()
                    .map(|r| vec![r[1].clone(), r[0].clone(), r[2].clone()])
                    .collect(),
            )
            .unwrap(),
        )
        .with_result("SELECT * FROM tracks", TabularResult::default())
        .with_error(
            "SELECT * FROM trakcs;",
            ErrorKind::Syntax,
            "relation \"trakcs\" does not exist",
        )
}

#[tokio::test]
async fn test_matching_submissions_pass() {
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let task = catalog.get(1).unwrap();
    let verifier = Verifier::new(Arc::new(runner()));

    for query in [
        "SELECT id, first_name, balance FROM customers",
        "SELECT * FROM customers ORDER BY first_name DESC",
        "SELECT id, first_name, (balance * 1.0) AS balance FROM customers",
    ] {
        let report = verifier.verify(task, query).await.unwrap();
        assert!(report.is_correct, "{query}: {:?}", report.error_message);
    }
}

#[tokio::test]
async fn test_reordered_columns_fail() {
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let verifier = Verifier::new(Arc::new(runner()));

    let report = verifier
        .verify(
            catalog.get(1).unwrap(),
            "SELECT first_name, id, balance FROM customers",
        )
        .await
        .unwrap();

    assert!(!report.is_correct);
    assert_eq!(report.error_kind, Some(FailureKind::Mismatch));
    assert!(report
        .error_message
        .unwrap()
        .starts_with("Column name mismatch."));
}

#[tokio::test]
async fn test_drop_is_rejected_before_execution() {
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let runner = Arc::new(runner());
    let verifier = Verifier::new(runner.clone());

    let report = verifier
        .verify(catalog.get(1).unwrap(), "DROP TABLE customers")
        .await
        .unwrap();

    assert!(!report.is_correct);
    assert_eq!(report.error_kind, Some(FailureKind::Rejected));
    assert_eq!(
        report.error_message.as_deref(),
        Some("Dangerous SQL operation detected (DROP). Only SELECT queries are allowed.")
    );
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_strict_guard_rejects_stacked_select() {
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let runner = Arc::new(runner());
    let verifier = Verifier::new(runner.clone()).with_guard(Guard::new(true));

    let report = verifier
        .verify(catalog.get(1).unwrap(), "SELECT 1; SELECT 2")
        .await
        .unwrap();

    assert_eq!(report.error_kind, Some(FailureKind::Rejected));
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_broken_reference_is_not_blamed_on_student() {
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let verifier = Verifier::new(Arc::new(runner()));

    let err = verifier
        .verify(catalog.get(2).unwrap(), "SELECT * FROM tracks")
        .await
        .unwrap_err();

    match err {
        GraderError::ReferenceQuery { task_id, message } => {
            assert_eq!(task_id, 2);
            assert!(message.contains("trakcs"));
        }
        other => panic!("Expected ReferenceQuery, got {other:?}"),
    }
}

#[tokio::test]
async fn test_report_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let log = AuditLog::open(&dir.path().join("audit.db")).await.unwrap();
    let catalog = TaskCatalog::from_toml(CATALOG).unwrap();
    let task = catalog.get(1).unwrap();
    let verifier = Verifier::new(Arc::new(runner()));

    let query = "SELECT id, first_name, balance FROM customers";
    let report = verifier.verify(task, query).await.unwrap();
    log.record(&report.audit_record(task.task_id, query))
        .await
        .unwrap();

    let entries = log.list(&AuditFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task_id, 1);
    assert_eq!(entries[0].user_query, query);
    assert!(entries[0].is_correct);
    assert_eq!(entries[0].error_message, None);

    log.close().await;
}

#[tokio::test]
async fn test_shared_verifier_across_tasks() {
    let catalog = Arc::new(TaskCatalog::from_toml(CATALOG).unwrap());
    let verifier = Arc::new(Verifier::new(Arc::new(runner())));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let verifier = verifier.clone();
            let catalog = catalog.clone();
            tokio::spawn(async move {
                let task = catalog.get(1).unwrap();
                verifier
                    .verify(task, "SELECT * FROM customers ORDER BY first_name DESC")
                    .await
                    .unwrap()
                    .is_correct
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}
