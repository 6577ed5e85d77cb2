//! Logging configuration for the grader.
//!
//! Logs go to stderr so that stdout carries only command output, such as
//! JSON reports.

use tracing_subscriber::EnvFilter;

/// Initializes stderr logging, filtered by `RUST_LOG` (default `info`).
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
