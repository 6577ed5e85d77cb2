//! Command-line front end for the query grader.

use anyhow::{Context, Result};
use query_grader::audit::{AuditFilter, AuditLog, AuditRecord};
use query_grader::catalog::{TaskCatalog, TaskFilter};
use query_grader::cli::{Cli, Command, HistoryArgs, SchemaArgs, TasksArgs, VerifyArgs};
use query_grader::config::Config;
use query_grader::db::{format_tables_for_hint, PostgresRunner, QueryRunner, SchemaContext};
use query_grader::error::GraderError;
use query_grader::logging;
use query_grader::verify::{VerificationReport, Verifier};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows of the submitted result printed in text mode.
const PREVIEW_ROWS: usize = 20;

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse_args();
    if let Err(e) = run(cli).await {
        match e.downcast_ref::<GraderError>() {
            Some(fault) if fault.is_internal_fault() => {
                eprintln!("Internal error: the task could not be graded. Details are in the log.");
            }
            Some(fault) => eprintln!("{}: {fault}", fault.category()),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    if let Some(path) = &cli.catalog {
        config.catalog.path = Some(path.clone());
    }

    match &cli.command {
        Command::Verify(args) => verify(&cli, &config, args).await,
        Command::Tasks(args) => list_tasks(&config, args),
        Command::Schema(args) => describe_schema(&cli, &config, args).await,
        Command::History(args) => show_history(&config, args).await,
    }
}

fn load_catalog(config: &Config) -> Result<TaskCatalog> {
    Ok(TaskCatalog::load(&config.catalog_path())?)
}

async fn connect(cli: &Cli, config: &Config) -> Result<Arc<PostgresRunner>> {
    let connection = config.resolve_connection(cli.database_url.as_deref())?;
    info!("Connecting to {}", connection.display_string());
    Ok(Arc::new(PostgresRunner::connect(&connection, &config.pool).await?))
}

async fn verify(cli: &Cli, config: &Config, args: &VerifyArgs) -> Result<()> {
    let catalog = load_catalog(config)?;
    let task = catalog.get(args.task)?;
    let query = read_query(args)?;

    let runner = connect(cli, config).await?;
    let verifier = Verifier::from_config(runner.clone(), config)?;
    let outcome = verifier.verify(task, &query).await;
    runner.close().await;
    let report = outcome?;

    if config.audit.enabled && !args.no_audit {
        let record = report.audit_record(task.task_id, query.trim());
        if let Err(e) = record_audit(config, &record).await {
            warn!("Could not write audit record: {e}");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(task.task_id, &report);
    }
    Ok(())
}

fn read_query(args: &VerifyArgs) -> Result<String> {
    match (&args.query, &args.file) {
        (Some(query), _) => Ok(query.clone()),
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut query = String::new();
            std::io::stdin()
                .read_to_string(&mut query)
                .context("Failed to read query from stdin")?;
            Ok(query)
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query from {}", path.display())),
        (None, None) => anyhow::bail!("Either --query or --file is required"),
    }
}

async fn record_audit(config: &Config, record: &AuditRecord) -> Result<()> {
    let log = AuditLog::open(&config.audit_path()).await?;
    let result = log.record(record).await;
    log.close().await;
    result?;
    Ok(())
}

fn print_report(task_id: i64, report: &VerificationReport) {
    match &report.error_message {
        None => println!(
            "PASS task {task_id}: {} rows in {}ms",
            report.row_count, report.execution_time_ms
        ),
        Some(message) => println!("FAIL task {task_id}: {message}"),
    }

    if report.user_columns.is_empty() {
        return;
    }

    println!();
    println!("{}", report.user_columns.join("\t"));
    for record in report.user_data.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = report
            .user_columns
            .iter()
            .map(|column| match record.get(column) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => "NULL".to_string(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    if report.row_count > PREVIEW_ROWS {
        println!("... {} more rows", report.row_count - PREVIEW_ROWS);
    }
}

fn list_tasks(config: &Config, args: &TasksArgs) -> Result<()> {
    let catalog = load_catalog(config)?;
    let filter = TaskFilter {
        category: args.category.clone(),
        difficulty: args.difficulty.clone(),
    };

    let tasks = catalog.list(&filter);
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    for task in tasks {
        println!(
            "{:>4}  {:<8}  {:<12}  {}",
            task.task_id, task.difficulty, task.category, task.title
        );
    }
    Ok(())
}

async fn describe_schema(cli: &Cli, config: &Config, args: &SchemaArgs) -> Result<()> {
    let task = match args.task {
        Some(task_id) => Some(load_catalog(config)?.get(task_id)?.clone()),
        None => None,
    };

    let runner = connect(cli, config).await?;
    let described = match &task {
        Some(task) => match Verifier::from_config(runner.clone(), config) {
            Ok(verifier) => verifier.schema_hint(task).await,
            Err(e) => Err(e),
        },
        None => runner
            .describe_tables(&args.tables, &SchemaContext::default())
            .await
            .map(|tables| format_tables_for_hint(&tables)),
    };
    runner.close().await;

    let described = described?;
    if described.is_empty() {
        println!("No matching tables found.");
    } else {
        print!("{described}");
    }
    Ok(())
}

async fn show_history(config: &Config, args: &HistoryArgs) -> Result<()> {
    let path = config.audit_path();
    if !path.exists() {
        println!("No verifications recorded yet.");
        return Ok(());
    }

    let log = AuditLog::open(&path).await?;
    let entries = log
        .list(&AuditFilter {
            task_id: args.task,
            limit: Some(args.limit),
        })
        .await;
    log.close().await;

    for entry in entries? {
        let first_line = entry.user_query.lines().next().unwrap_or_default();
        println!(
            "{}  task {:>4}  {}  {:>6}ms  {}",
            entry.created_at,
            entry.task_id,
            if entry.is_correct { "PASS" } else { "FAIL" },
            entry.execution_time_ms,
            first_line
        );
    }
    Ok(())
}
