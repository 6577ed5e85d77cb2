//! PostgreSQL runner integration tests.
//!
//! Each test creates its own schema with a separate admin pool, grades
//! against it through a read-only runner, and drops it afterwards.

use query_grader::catalog::Task;
use query_grader::config::{ConnectionConfig, PoolConfig};
use query_grader::db::{PostgresRunner, QueryRunner, SchemaContext, Value};
use query_grader::executor::{ErrorKind, ExecutionOutcome, Executor};
use query_grader::guard::validate;
use query_grader::verify::{FailureKind, Verifier};
use sqlx::postgres::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_SCHEMA: AtomicUsize = AtomicUsize::new(0);

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

struct Fixture {
    admin: PgPool,
    schema: String,
    runner: Arc<PostgresRunner>,
}

impl Fixture {
    async fn setup(statement_timeout_ms: u64) -> Option<Self> {
        let url = get_test_database_url()?;
        let admin = PgPool::connect(&url).await.ok()?;
        let schema = format!(
            "grader_it_{}_{}",
            std::process::id(),
            NEXT_SCHEMA.fetch_add(1, Ordering::SeqCst)
        );

        let statements = [
            format!("DROP SCHEMA IF EXISTS {schema} CASCADE"),
            format!("CREATE SCHEMA {schema}"),
            format!(
                "CREATE TABLE {schema}.customers (
                    id INTEGER PRIMARY KEY,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    balance NUMERIC(10, 2),
                    signed_up DATE
                )"
            ),
            format!(
                "INSERT INTO {schema}.customers VALUES
                    (1, 'Ann', 'Lee', 12.50, '2024-01-15'),
                    (2, 'Bob', 'Ray', NULL, '2024-02-01'),
                    (3, 'Cid', 'Moe', 0.10, NULL)"
            ),
            format!("CREATE SEQUENCE {schema}.ticket_seq"),
        ];
        for statement in &statements {
            sqlx::query(statement).execute(&admin).await.ok()?;
        }

        let config = ConnectionConfig::from_connection_string(&url).ok()?;
        let pool_config = PoolConfig {
            max_connections: 2,
            acquire_timeout_secs: 5,
            statement_timeout_ms,
        };
        let runner = PostgresRunner::connect(&config, &pool_config).await.ok()?;

        Some(Self {
            admin,
            schema,
            runner: Arc::new(runner),
        })
    }

    fn context(&self) -> SchemaContext {
        SchemaContext::search_path(&self.schema).unwrap()
    }

    fn verifier(&self) -> Verifier {
        Verifier::new(self.runner.clone()).with_schema("ecommerce", self.context())
    }

    async fn customer_count(&self) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}.customers", self.schema))
                .fetch_one(&self.admin)
                .await
                .unwrap();
        count
    }

    async fn teardown(self) {
        self.runner.close().await;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .unwrap();
        self.admin.close().await;
    }
}

fn task(gold_query: &str) -> Task {
    Task {
        task_id: 1,
        title: "Select customer names".to_string(),
        description: String::new(),
        difficulty: "easy".to_string(),
        category: "ecommerce".to_string(),
        database_schema: "ecommerce".to_string(),
        gold_query: gold_query.to_string(),
        tables_involved: vec!["customers".to_string()],
    }
}

#[tokio::test]
async fn test_verify_correct_submission() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let report = fixture
        .verifier()
        .verify(
            &task("SELECT first_name, last_name FROM customers;"),
            "select FIRST_NAME, last_name from customers order by last_name",
        )
        .await
        .unwrap();

    assert!(report.is_correct, "{:?}", report.error_message);
    assert_eq!(report.row_count, 3);
    assert_eq!(report.expected_row_count, 3);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_drop_is_rejected_and_table_survives() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let report = fixture
        .verifier()
        .verify(&task("SELECT * FROM customers;"), "DROP TABLE customers")
        .await
        .unwrap();

    assert!(!report.is_correct);
    assert_eq!(report.error_kind, Some(FailureKind::Rejected));
    assert_eq!(fixture.customer_count().await, 3);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_numeric_and_date_decoding() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate("SELECT id, balance, signed_up FROM customers ORDER BY id").unwrap();
    let result = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["id", "balance", "signed_up"]);
    assert_eq!(
        result.rows[0],
        vec![
            Value::Int(1),
            Value::Float(12.5),
            Value::Text("2024-01-15".to_string())
        ]
    );
    assert_eq!(result.rows[1][1], Value::Null);
    assert_eq!(result.rows[2][2], Value::Null);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_extended_type_decoding() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate(
        "SELECT interval '1 year 2 months 3 days 04:05:06' AS span, \
                '6f1c3e5a-8b2d-4c1e-9f3a-2b4c6d8e0f1a'::uuid AS id, \
                '{\"a\": 1}'::jsonb AS doc, \
                'NaN'::numeric AS missing, \
                '10:00:00+02'::timetz AS local_time",
    )
    .unwrap();
    let result = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap();

    let row = &result.rows[0];
    assert_eq!(row[0], Value::Text("1 year 2 mons 3 days 04:05:06".to_string()));
    assert_eq!(
        row[1],
        Value::Text("6f1c3e5a-8b2d-4c1e-9f3a-2b4c6d8e0f1a".to_string())
    );
    assert_eq!(row[2], Value::Text("{\"a\":1}".to_string()));
    assert!(matches!(row[3], Value::Float(f) if f.is_nan()));
    assert!(matches!(row[4], Value::Text(_)));

    fixture.teardown().await;
}

#[tokio::test]
async fn test_array_agg_decoding() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate(
        "SELECT array_agg(first_name ORDER BY id) AS names, \
                array_agg(balance ORDER BY id) AS balances, \
                array_agg(id ORDER BY id) AS ids \
         FROM customers",
    )
    .unwrap();
    let result = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap();

    assert_eq!(
        result.rows[0],
        vec![
            Value::Text("{Ann,Bob,Cid}".to_string()),
            Value::Text("{12.50,NULL,0.10}".to_string()),
            Value::Text("{1,2,3}".to_string()),
        ]
    );

    fixture.teardown().await;
}

#[tokio::test]
async fn test_interval_gold_query_grades_correct() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let gold = "SELECT id, age(DATE '2024-03-01', signed_up) AS tenure FROM customers";
    let report = fixture.verifier().verify(&task(gold), gold).await.unwrap();

    assert!(report.is_correct, "{:?}", report.error_message);
    assert_eq!(report.row_count, 3);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_undecodable_type_names_the_column() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate("SELECT 'fat cats'::tsvector AS doc").unwrap();
    let err = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Data);
    assert!(err.message.contains("\"doc\""), "{}", err.message);
    assert!(err.message.contains("doc::text"), "{}", err.message);
    assert!(!err.message.contains("Rust"), "{}", err.message);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate("SELECT id, first_name FROM customers WHERE id < 0").unwrap();
    let result = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.columns, vec!["id", "first_name"]);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_syntax_error_is_classified() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = Executor::new(fixture.runner.as_ref());
    let query = validate("SELECT nme FROM customers").unwrap();
    let outcome = executor.execute(&query, &fixture.context()).await;

    match outcome {
        ExecutionOutcome::Failure { kind, message, .. } => {
            assert_eq!(kind, ErrorKind::Syntax);
            assert!(message.contains("nme"), "{message}");
        }
        other => panic!("Expected Failure, got {other:?}"),
    }

    fixture.teardown().await;
}

#[tokio::test]
async fn test_write_through_function_is_blocked_by_transaction() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    // Passes the keyword filter, but nextval writes.
    let query = validate("SELECT nextval('ticket_seq')").unwrap();
    let err = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Operational);
    assert!(err.message.contains("read-only"), "{}", err.message);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_statement_timeout() {
    let Some(fixture) = Fixture::setup(200).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = validate("SELECT pg_sleep(2)").unwrap();
    let err = fixture
        .runner
        .run_read_only(&query, &fixture.context())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Operational);

    fixture.teardown().await;
}

#[tokio::test]
async fn test_describe_tables() {
    let Some(fixture) = Fixture::setup(30_000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let tables = fixture
        .runner
        .describe_tables(
            &["customers".to_string(), "missing".to_string()],
            &fixture.context(),
        )
        .await
        .unwrap();

    assert_eq!(tables.len(), 1);
    let columns: Vec<&str> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        columns,
        vec!["id", "first_name", "last_name", "balance", "signed_up"]
    );
    assert!(!tables[0].columns[0].is_nullable);
    assert!(tables[0].columns[3].is_nullable);

    fixture.teardown().await;
}
