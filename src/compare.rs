//! Result comparison for grading.
//!
//! Decides whether a submitted query's result is equivalent to the
//! reference result. Column order matters (it is part of what a task asks
//! for), row order does not (SQL leaves it unspecified without ORDER BY),
//! and numbers compare with a small tolerance regardless of integer or
//! floating-point type.
//!
//! Checks run in a fixed order and the first failing one becomes the
//! diagnostic; there is never a full diff.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

use crate::db::{Row, TabularResult, Value};

/// Relative tolerance for numeric comparison.
pub const RELATIVE_TOLERANCE: f64 = 1e-5;

/// Absolute tolerance for numeric comparison, for values near zero.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-8;

/// Why two results were judged equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualReason {
    /// Neither query returned rows; column shape is not checked.
    BothEmpty,
    Match,
}

/// The first point at which two results differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mismatch {
    RowCount { actual: usize, expected: usize },
    ColumnCount { actual: usize, expected: usize },
    /// Lowercased names that differ position by position. Both lists are
    /// empty when only the order is wrong.
    ColumnNames {
        missing: Vec<String>,
        extra: Vec<String>,
    },
    /// Names that occur more than once, so columns cannot be matched up.
    DuplicateColumns { names: Vec<String> },
    /// 1-based index of the first differing row, after sorting.
    Row { index: usize },
    /// One of the results was not a well-formed table.
    Malformed,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowCount { actual, expected } => write!(
                f,
                "Row count mismatch: Your query returned {actual} rows, expected {expected} rows"
            ),
            Self::ColumnCount { actual, expected } => write!(
                f,
                "Column count mismatch: Your query returned {actual} columns, expected {expected} columns"
            ),
            Self::ColumnNames { missing, extra } => {
                write!(f, "Column name mismatch.")?;
                if !missing.is_empty() {
                    write!(f, " Missing columns: {}.", missing.join(", "))?;
                }
                if !extra.is_empty() {
                    write!(f, " Extra columns: {}.", extra.join(", "))?;
                }
                if missing.is_empty() && extra.is_empty() {
                    write!(f, " Check the column order.")?;
                }
                Ok(())
            }
            Self::DuplicateColumns { names } => write!(
                f,
                "Duplicate column names: {}. Give each column a distinct alias.",
                names.join(", ")
            ),
            Self::Row { index } => {
                write!(f, "Data mismatch in row {index}. Check your query logic.")
            }
            Self::Malformed => {
                write!(f, "Results don't match. Check data types and value formatting.")
            }
        }
    }
}

/// Outcome of comparing a submitted result against the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Equal(EqualReason),
    Unequal(Mismatch),
}

impl Verdict {
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal(_))
    }

    /// Human-readable summary for either outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Equal(EqualReason::BothEmpty) => {
                "Both queries returned empty results (correct)".to_string()
            }
            Self::Equal(EqualReason::Match) => "Results match perfectly!".to_string(),
            Self::Unequal(mismatch) => mismatch.to_string(),
        }
    }

    /// The mismatch, if the results differ.
    pub fn mismatch(&self) -> Option<&Mismatch> {
        match self {
            Self::Equal(_) => None,
            Self::Unequal(mismatch) => Some(mismatch),
        }
    }
}

/// Compares a submitted result (`actual`) against the reference (`expected`).
pub fn compare(actual: &TabularResult, expected: &TabularResult) -> Verdict {
    for table in [actual, expected] {
        if let Err(e) = table.check_shape() {
            debug!("Cannot compare malformed result: {e}");
            return Verdict::Unequal(Mismatch::Malformed);
        }
    }

    if actual.is_empty() && expected.is_empty() {
        return Verdict::Equal(EqualReason::BothEmpty);
    }

    if actual.row_count() != expected.row_count() {
        return Verdict::Unequal(Mismatch::RowCount {
            actual: actual.row_count(),
            expected: expected.row_count(),
        });
    }

    if actual.column_count() != expected.column_count() {
        return Verdict::Unequal(Mismatch::ColumnCount {
            actual: actual.column_count(),
            expected: expected.column_count(),
        });
    }

    let actual_names = lowercase_names(actual);
    let expected_names = lowercase_names(expected);

    // Position by position: column order is part of the answer.
    if actual_names != expected_names {
        return Verdict::Unequal(column_name_mismatch(&actual_names, &expected_names));
    }

    let duplicates = duplicate_names(&expected_names);
    if !duplicates.is_empty() {
        return Verdict::Unequal(Mismatch::DuplicateColumns { names: duplicates });
    }

    // Names now agree case-insensitively at every position, so matching
    // values by position is the same as renaming actual's columns to the
    // expected names.
    let (actual_rows, expected_rows) = if is_sortable(actual) && is_sortable(expected) {
        (sorted_rows(actual), sorted_rows(expected))
    } else {
        // Row order becomes significant here. Mixed-type columns are rare
        // in the sample databases.
        debug!("Result has mixed-type columns, comparing rows in original order");
        (actual.rows.iter().collect(), expected.rows.iter().collect())
    };

    match actual_rows
        .iter()
        .zip(&expected_rows)
        .position(|(a, e)| !rows_equal(a, e))
    {
        Some(index) => Verdict::Unequal(Mismatch::Row { index: index + 1 }),
        None => Verdict::Equal(EqualReason::Match),
    }
}

fn lowercase_names(table: &TabularResult) -> Vec<String> {
    table.columns.iter().map(|c| c.to_lowercase()).collect()
}

fn column_name_mismatch(actual: &[String], expected: &[String]) -> Mismatch {
    let actual_set: BTreeSet<&String> = actual.iter().collect();
    let expected_set: BTreeSet<&String> = expected.iter().collect();

    Mismatch::ColumnNames {
        missing: expected_set
            .difference(&actual_set)
            .map(|s| s.to_string())
            .collect(),
        extra: actual_set
            .difference(&expected_set)
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Names occurring more than once, in order of first repetition.
fn duplicate_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for name in names {
        if !seen.insert(name) && !duplicates.contains(name) {
            duplicates.push(name.clone());
        }
    }
    duplicates
}

/// Kinds of values that order against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Numeric,
    Text,
    Bool,
}

fn family(value: &Value) -> Option<Family> {
    match value {
        Value::Null => None,
        Value::Int(_) | Value::Float(_) => Some(Family::Numeric),
        Value::Text(_) => Some(Family::Text),
        Value::Bool(_) => Some(Family::Bool),
    }
}

/// True if every column holds values of a single family (NULLs aside).
fn is_sortable(table: &TabularResult) -> bool {
    (0..table.column_count()).all(|index| {
        let mut families = table.column(index).filter_map(family);
        match families.next() {
            Some(first) => families.all(|f| f == first),
            None => true,
        }
    })
}

fn sorted_rows(table: &TabularResult) -> Vec<&Row> {
    let mut rows: Vec<&Row> = table.rows.iter().collect();
    rows.sort_by(|a, b| compare_rows(a, b));
    rows
}

fn compare_rows(a: &Row, b: &Row) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare_values(x, y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Orders two values of the same family. NaN sorts after numbers and
/// NULL sorts after everything.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = |v: &Value| match v {
        Value::Null => 2,
        Value::Float(f) if f.is_nan() => 1,
        _ => 0,
    };
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal if rank(a) > 0 => return Ordering::Equal,
        Ordering::Equal => {}
        unequal => return unequal,
    }

    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Value equality for grading: numbers within tolerance, everything else exact.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => floats_close(a, b),
                _ => false,
            }
        }
        _ => false,
    }
}

/// `|a - b| <= atol + rtol * |b|`, with NaN equal only to NaN.
fn floats_close(actual: f64, expected: f64) -> bool {
    if actual.is_nan() || expected.is_nan() {
        return actual.is_nan() && expected.is_nan();
    }
    if actual == expected {
        // Covers matching infinities.
        return true;
    }
    (actual - expected).abs() <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * expected.abs()
}
