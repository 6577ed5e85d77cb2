//! PostgreSQL query runner.
//!
//! Provides the `PostgresRunner` struct that implements the `QueryRunner`
//! trait on a read-only sqlx connection pool.

use crate::config::{ConnectionConfig, PoolConfig};
use crate::db::{
    ColumnDescription, QueryRunner, Row, SchemaContext, TableDescription, TabularResult, Value,
};
use crate::error::{GraderError, Result};
use crate::executor::{ErrorKind, ExecutionError};
use crate::guard::ValidatedQuery;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgConnectOptions, PgHasArrayType, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::types::{JsonValue, Uuid};
use sqlx::{Column as SqlxColumn, Executor as _, Row as SqlxRow, Statement as _, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Read-only PostgreSQL runner.
///
/// Every session is opened with `default_transaction_read_only` and a
/// statement timeout, and every query additionally runs in an explicit
/// read-only transaction that is rolled back. Connect with credentials
/// of a role that has no write privileges.
#[derive(Debug)]
pub struct PostgresRunner {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PostgresRunner {
    /// Opens the read-only pool, retrying transient failures.
    pub async fn connect(config: &ConnectionConfig, pool_config: &PoolConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let options = PgConnectOptions::from_str(&conn_str)
            .map_err(|e| GraderError::config(format!("Invalid connection string: {e}")))?
            .options([
                (
                    "statement_timeout",
                    pool_config.statement_timeout_ms.to_string(),
                ),
                ("default_transaction_read_only", "on".to_string()),
            ]);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(pool_config.max_connections)
                .acquire_timeout(Duration::from_secs(pool_config.acquire_timeout_secs))
                .connect_with(options.clone())
                .await;

            match result {
                Ok(pool) => {
                    info!("Connected to {}", config.display_string());
                    return Ok(Self {
                        pool,
                        statement_timeout_ms: pool_config.statement_timeout_ms,
                    });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2; // Exponential backoff
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, config),
            None => GraderError::connection("No connection attempt was made"),
        })
    }

    /// Sets up the transaction, runs the query and returns the column
    /// names with the raw rows.
    ///
    /// The caller owns the transaction and rolls it back.
    async fn run_in_transaction(
        &self,
        tx: &mut sqlx::PgConnection,
        sql: &str,
        context: &SchemaContext,
    ) -> std::result::Result<(Vec<String>, Vec<PgRow>), sqlx::Error> {
        (&mut *tx).execute("SET TRANSACTION READ ONLY").await?;
        (&mut *tx)
            .execute(format!("SET LOCAL statement_timeout = {}", self.statement_timeout_ms).as_str())
            .await?;
        if let Some(schema) = context.schema() {
            // `schema` is a checked plain identifier, folded to lowercase.
            (&mut *tx)
                .execute(format!("SET LOCAL search_path TO \"{schema}\"").as_str())
                .await?;
        }

        let rows: Vec<PgRow> = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *tx)
            .await?;

        let columns: Vec<String> = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            // No rows to read names from: ask the server to describe the statement.
            None => (&mut *tx)
                .prepare(sql)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        Ok((columns, rows))
    }
}

#[async_trait]
impl QueryRunner for PostgresRunner {
    async fn run_read_only(
        &self,
        query: &ValidatedQuery,
        context: &SchemaContext,
    ) -> std::result::Result<TabularResult, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(classify_error)?;

        let fetched = self
            .run_in_transaction(&mut *tx, query.as_str(), context)
            .await;

        // Never commit, even for a successful read.
        if let Err(e) = tx.rollback().await {
            warn!("Failed to roll back read-only transaction: {e}");
        }

        let (columns, rows) = fetched.map_err(classify_error)?;
        if rows.is_empty() {
            return Ok(TabularResult::empty(columns));
        }

        let rows = rows
            .iter()
            .map(convert_row)
            .collect::<std::result::Result<Vec<Row>, ExecutionError>>()?;
        TabularResult::new(columns, rows)
            .map_err(|e| ExecutionError::new(ErrorKind::Other, e.to_string()))
    }

    async fn describe_tables(
        &self,
        tables: &[String],
        context: &SchemaContext,
    ) -> Result<Vec<TableDescription>> {
        let mut descriptions = Vec::with_capacity(tables.len());

        for table in tables {
            let table = table.trim();
            let rows: Vec<(String, String, String)> = sqlx::query_as(
                r#"
                SELECT
                    column_name::text,
                    data_type::text,
                    is_nullable::text
                FROM information_schema.columns
                WHERE table_name = $1
                    AND CASE WHEN $2::text IS NULL
                        THEN table_schema = ANY(current_schemas(false))
                        ELSE table_schema = $2::text
                    END
                ORDER BY ordinal_position
                "#,
            )
            .bind(table)
            .bind(context.schema())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GraderError::connection(format!("Failed to describe {table}: {e}")))?;

            if rows.is_empty() {
                debug!("Table {} not found, skipping", table);
                continue;
            }

            descriptions.push(TableDescription {
                name: table.to_string(),
                columns: rows
                    .into_iter()
                    .map(|(name, data_type, is_nullable)| ColumnDescription {
                        name,
                        data_type,
                        is_nullable: is_nullable == "YES",
                    })
                    .collect(),
            });
        }

        Ok(descriptions)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Converts a sqlx PgRow to our Row type.
///
/// A column that cannot be decoded fails the whole row with a message
/// naming the column and its type.
fn convert_row(row: &PgRow) -> std::result::Result<Row, ExecutionError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let type_name = col.type_info().name();
            convert_value(row, i, type_name).map_err(|e| {
                debug!("Cannot decode column {} ({}): {}", col.name(), type_name, e);
                undecodable_column(col.name(), type_name)
            })
        })
        .collect()
}

fn undecodable_column(name: &str, type_name: &str) -> ExecutionError {
    ExecutionError::new(
        ErrorKind::Data,
        format!(
            "Column \"{name}\" has type {type_name}, which cannot be compared. \
             Cast it to text, for example {name}::text."
        ),
    )
}

/// Converts a single column value from a PgRow to our Value type.
///
/// Types without a mapping are read as text; a value that cannot be read
/// that way is an error rather than a silent NULL.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "NUMERIC" => convert_numeric(row, index)?,
        // Whole cents, assuming the usual two fractional digits.
        "MONEY" => row
            .try_get::<Option<PgMoney>, _>(index)?
            .map(|v| Value::Float(v.0 as f64 / 100.0)),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|v| Value::Text(v.to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(|v| Value::Text(v.to_string())),
        "TIMETZ" => row
            .try_get::<Option<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>, _>(index)?
            .map(|v| Value::Text(format!("{}{}", v.time, v.offset))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|v| Value::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|v| Value::Text(v.to_rfc3339())),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(index)?
            .map(|v| Value::Text(format_interval(&v))),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|v| Value::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(index)?
            .map(|v| Value::Text(v.to_string())),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(|v| Value::Text(format_bytea(&v))),
        "BOOL[]" => array_text::<bool>(row, index, |v| (if v { "t" } else { "f" }).to_string())?,
        "INT2[]" => array_text::<i16>(row, index, |v| v.to_string())?,
        "INT4[]" => array_text::<i32>(row, index, |v| v.to_string())?,
        "INT8[]" => array_text::<i64>(row, index, |v| v.to_string())?,
        "FLOAT4[]" => array_text::<f32>(row, index, |v| format_float(v.into()))?,
        "FLOAT8[]" => array_text::<f64>(row, index, format_float)?,
        "NUMERIC[]" => array_text::<Decimal>(row, index, |v| v.to_string())?,
        "DATE[]" => array_text::<chrono::NaiveDate>(row, index, |v| v.to_string())?,
        "UUID[]" => array_text::<Uuid>(row, index, |v| v.to_string())?,
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => {
            array_text::<String>(row, index, quote_array_element)?
        }
        _ => row.try_get::<Option<String>, _>(index)?.map(Value::Text),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Sign words of the binary NUMERIC header for values `Decimal` cannot hold.
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_POS_INF: u16 = 0xD000;
const NUMERIC_NEG_INF: u16 = 0xF000;

/// Decodes NUMERIC to a float, including `NaN` and the infinities.
fn convert_numeric(row: &PgRow, index: usize) -> std::result::Result<Option<Value>, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(None);
    }
    if let Some(special) = raw.as_bytes().ok().and_then(numeric_special) {
        return Ok(Some(Value::Float(special)));
    }

    let decimal = row.try_get::<Decimal, _>(index)?;
    Ok(Some(
        decimal
            .to_f64()
            .map(Value::Float)
            .unwrap_or_else(|| Value::Text(decimal.to_string())),
    ))
}

/// Reads the sign word (bytes 4..6) of a binary NUMERIC value.
fn numeric_special(bytes: &[u8]) -> Option<f64> {
    let sign = bytes.get(4..6)?;
    match u16::from_be_bytes([sign[0], sign[1]]) {
        NUMERIC_NAN => Some(f64::NAN),
        NUMERIC_POS_INF => Some(f64::INFINITY),
        NUMERIC_NEG_INF => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Decodes a one-dimensional array and renders it in PostgreSQL's text form.
fn array_text<T>(
    row: &PgRow,
    index: usize,
    render: impl Fn(T) -> String,
) -> std::result::Result<Option<Value>, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + PgHasArrayType,
{
    Ok(row
        .try_get::<Option<Vec<Option<T>>>, _>(index)?
        .map(|items| Value::Text(format_array(items.into_iter().map(|item| item.map(&render))))))
}

fn format_array(items: impl Iterator<Item = Option<String>>) -> String {
    let items: Vec<String> = items
        .map(|item| item.unwrap_or_else(|| "NULL".to_string()))
        .collect();
    format!("{{{}}}", items.join(","))
}

/// Quotes a text array element the way PostgreSQL's array output does.
fn quote_array_element(element: String) -> String {
    let needs_quotes = element.is_empty()
        || element.eq_ignore_ascii_case("NULL")
        || element
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return element;
    }

    let mut quoted = String::with_capacity(element.len() + 2);
    quoted.push('"');
    for c in element.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn format_float(value: f64) -> String {
    match value {
        v if v == f64::INFINITY => "Infinity".to_string(),
        v if v == f64::NEG_INFINITY => "-Infinity".to_string(),
        v => v.to_string(),
    }
}

/// Formats an interval in PostgreSQL's default output style,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    let unit = |n: i32, name: &str| {
        if n == 1 {
            format!("1 {name}")
        } else {
            format!("{n} {name}s")
        }
    };

    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(unit(years, "year"));
    }
    if months != 0 {
        parts.push(unit(months, "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days, "day"));
    }

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            time.push('.');
            time.push_str(format!("{fraction:06}").trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

fn format_bytea(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("\\x{hex}")
}

/// Maps a SQLSTATE code to an error kind by its two-character class.
fn kind_for_sqlstate(code: &str) -> ErrorKind {
    match code.get(..2) {
        // syntax error or access rule violation, feature not supported
        Some("42") | Some("0A") => ErrorKind::Syntax,
        // data exception, cardinality violation
        Some("22") | Some("21") => ErrorKind::Data,
        // connection, invalid transaction state (read-only), resources,
        // program limits, object state, operator intervention (timeouts)
        Some("08") | Some("25") | Some("53") | Some("54") | Some("55") | Some("57") => {
            ErrorKind::Operational
        }
        _ => ErrorKind::Other,
    }
}

/// Classifies a sqlx error, keeping the database's message text.
fn classify_error(error: sqlx::Error) -> ExecutionError {
    match &error {
        sqlx::Error::Database(db_error) => {
            let kind = db_error
                .code()
                .map(|code| kind_for_sqlstate(&code))
                .unwrap_or(ErrorKind::Other);
            ExecutionError::new(kind, format_database_error(&**db_error))
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => ExecutionError::new(ErrorKind::Operational, error.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            debug!("Decode failure: {error}");
            ExecutionError::new(
                ErrorKind::Data,
                "A result value could not be read. Try casting the column to text.",
            )
        }
        _ => ExecutionError::new(ErrorKind::Other, error.to_string()),
    }
}

/// Formats a database error with detail and hint lines if available.
fn format_database_error(db_error: &dyn sqlx::error::DatabaseError) -> String {
    let mut result = db_error.message().to_string();

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to operator-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> GraderError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        GraderError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        GraderError::connection(format!(
            "Authentication failed for user '{user}'. Check the read-only credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        GraderError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        GraderError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        GraderError::connection(error.to_string())
    }
}
