//! Command-line argument parsing for the grader.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Grades SQL queries against reference queries on a read-only database.
#[derive(Parser, Debug)]
#[command(name = "grader")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Read-only PostgreSQL connection string (overrides READONLY_DATABASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Task catalog file (overrides catalog.path)
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify a query against a task's reference query
    Verify(VerifyArgs),

    /// List tasks in the catalog
    Tasks(TasksArgs),

    /// Describe the tables of a task, or named tables
    Schema(SchemaArgs),

    /// Show recorded verifications
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Task to verify against
    #[arg(long, value_name = "ID")]
    pub task: i64,

    /// SQL text to verify
    #[arg(long, value_name = "SQL", conflicts_with = "file", required_unless_present = "file")]
    pub query: Option<String>,

    /// Read the SQL from a file ("-" for stdin)
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not write an audit record
    #[arg(long)]
    pub no_audit: bool,
}

#[derive(Args, Debug)]
pub struct TasksArgs {
    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub difficulty: Option<String>,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Describe the tables involved in this task
    #[arg(long, value_name = "ID", conflicts_with = "tables", required_unless_present = "tables")]
    pub task: Option<i64>,

    /// Comma-separated table names
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub tables: Vec<String>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only show records for this task
    #[arg(long, value_name = "ID")]
    pub task: Option<i64>,

    /// Maximum records to show
    #[arg(long, default_value = "20")]
    pub limit: i64,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }
}
