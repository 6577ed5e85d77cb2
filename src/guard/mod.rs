//! Statement guard for submitted SQL.
//!
//! A lexical keyword filter that runs before any query reaches the
//! database. It only looks at words, so a blocked keyword inside a string
//! literal or identifier (`WHERE note = 'drop'`) is rejected too, and a
//! write hidden behind a keyword it does not know about is let through.
//! The read-only transaction and role used by the executor are the real
//! safety boundary; this filter exists to give students a clear message
//! early.
//!
//! An opt-in strict mode additionally parses the text and requires a
//! single read-only query (see [`strict`]).

pub mod strict;

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Keywords that reject a query wherever they appear as a whole word.
pub const BLOCKED_KEYWORDS: [&str; 11] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE",
];

/// Why a query was refused before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("Query is empty")]
    Empty,

    #[error("Query is too long ({len} characters, maximum is {max})")]
    TooLong { len: usize, max: usize },

    #[error("Dangerous SQL operation detected ({0}). Only SELECT queries are allowed.")]
    BlockedKeyword(&'static str),

    #[error("Query must be a SELECT statement")]
    MissingSelect,

    #[error("Only a single SELECT statement is allowed")]
    MultipleStatements,

    #[error("Only read-only queries are allowed ({0} detected)")]
    NotReadOnly(String),
}

/// SQL text that passed the guard.
///
/// The executor only accepts this type, so unvalidated text cannot reach
/// the database through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Guard settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guard {
    /// Also parse the query and require exactly one read-only statement.
    pub strict_parse: bool,
}

impl Guard {
    pub fn new(strict_parse: bool) -> Self {
        Self { strict_parse }
    }

    /// Validates a query with these settings.
    pub fn check(&self, sql: &str) -> Result<ValidatedQuery, RejectionReason> {
        let validated = validate(sql)?;
        if self.strict_parse {
            strict::check_read_only(validated.as_str())?;
        }
        Ok(validated)
    }
}

fn keyword_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BLOCKED_KEYWORDS
            .iter()
            .map(|kw| {
                let pattern = format!(r"(?i)\b{kw}\b");
                (*kw, Regex::new(&pattern).expect("keyword pattern is valid"))
            })
            .collect()
    })
}

/// Checks that a query is read-only by keyword inspection.
///
/// Rejects the first blocked keyword (in [`BLOCKED_KEYWORDS`] order) found
/// as a whole word, then requires `SELECT` to appear somewhere.
pub fn validate(sql: &str) -> Result<ValidatedQuery, RejectionReason> {
    if let Some((kw, _)) = keyword_patterns().iter().find(|(_, re)| re.is_match(sql)) {
        return Err(RejectionReason::BlockedKeyword(kw));
    }

    if !sql.to_uppercase().contains("SELECT") {
        return Err(RejectionReason::MissingSelect);
    }

    Ok(ValidatedQuery(sql.to_string()))
}

/// Checks the query length against the configured maximum (in characters).
pub fn check_length(sql: &str, max: usize) -> Result<(), RejectionReason> {
    if sql.trim().is_empty() {
        return Err(RejectionReason::Empty);
    }
    let len = sql.chars().count();
    if len > max {
        return Err(RejectionReason::TooLong { len, max });
    }
    Ok(())
}
