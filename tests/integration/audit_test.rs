//! Audit log integration tests.

use query_grader::audit::{AuditFilter, AuditLog, AuditRecord};
use tempfile::tempdir;

fn record(task_id: i64, query: &str, is_correct: bool) -> AuditRecord {
    AuditRecord {
        task_id,
        user_query: query.to_string(),
        is_correct,
        execution_time_ms: 5,
        error_message: (!is_correct).then(|| "Results don't match.".to_string()),
    }
}

#[tokio::test]
async fn test_record_and_list_by_task() {
    let dir = tempdir().unwrap();
    let log = AuditLog::open(&dir.path().join("audit.db")).await.unwrap();

    log.record(&record(1, "SELECT * FROM customers", true))
        .await
        .unwrap();
    log.record(&record(2, "SELECT first_name FROM customers", false))
        .await
        .unwrap();
    log.record(&record(2, "SELECT first_name, last_name FROM customers", true))
        .await
        .unwrap();

    assert_eq!(log.count().await.unwrap(), 3);

    let task_two = log
        .list(&AuditFilter {
            task_id: Some(2),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(task_two.len(), 2);
    assert_eq!(
        task_two[0].user_query,
        "SELECT first_name, last_name FROM customers"
    );
    assert!(task_two[0].is_correct);
    assert_eq!(
        task_two[1].error_message.as_deref(),
        Some("Results don't match.")
    );

    log.close().await;
}

#[tokio::test]
async fn test_list_limit() {
    let dir = tempdir().unwrap();
    let log = AuditLog::open(&dir.path().join("audit.db")).await.unwrap();

    for i in 0..5 {
        log.record(&record(1, &format!("SELECT {i}"), true))
            .await
            .unwrap();
    }

    let entries = log
        .list(&AuditFilter {
            task_id: None,
            limit: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].user_query, "SELECT 4");

    log.close().await;
}
