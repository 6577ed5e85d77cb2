//! Parser-based read-only check.
//!
//! Uses sqlparser-rs with the PostgreSQL dialect. Enabled with
//! `guard.strict_parse`; the default guard is the keyword filter alone.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use super::RejectionReason;

/// Requires `sql` to be exactly one read-only query.
///
/// Text that does not parse is let through: the database reports the
/// syntax error to the student with better context than the parser would.
pub fn check_read_only(sql: &str) -> Result<(), RejectionReason> {
    let statements = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("Strict guard could not parse query: {e}");
            return Ok(());
        }
    };

    match statements.as_slice() {
        [] => Err(RejectionReason::MissingSelect),
        [Statement::Query(query)] => check_query(query),
        [other] => Err(RejectionReason::NotReadOnly(statement_keyword(other))),
        _ => Err(RejectionReason::MultipleStatements),
    }
}

/// Returns the leading keyword of a statement for display, e.g. `EXPLAIN`.
fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Checks a query, including its CTEs, for data-modifying parts.
fn check_query(query: &Query) -> Result<(), RejectionReason> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(set_expr: &SetExpr) -> Result<(), RejectionReason> {
    match set_expr {
        SetExpr::Select(select) => check_select(select),
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        // INSERT/UPDATE/DELETE/MERGE bodies inside a WITH clause
        other => Err(RejectionReason::NotReadOnly(
            other
                .to_string()
                .split_whitespace()
                .next()
                .unwrap_or("UNKNOWN")
                .to_uppercase(),
        )),
    }
}

fn check_select(select: &Select) -> Result<(), RejectionReason> {
    select.from.iter().try_for_each(check_table_with_joins)
}

fn check_table_with_joins(twj: &TableWithJoins) -> Result<(), RejectionReason> {
    check_table_factor(&twj.relation)?;
    twj.joins
        .iter()
        .try_for_each(|join| check_table_factor(&join.relation))
}

fn check_table_factor(factor: &TableFactor) -> Result<(), RejectionReason> {
    match factor {
        TableFactor::Derived { subquery, .. } => check_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => check_table_with_joins(table_with_joins),
        _ => Ok(()),
    }
}
