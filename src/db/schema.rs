//! Table descriptions for schema introspection.
//!
//! Consumed by the hint generator, which needs to know what the tables of
//! a task look like.

use serde::{Deserialize, Serialize};

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// A table and its columns, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

impl TableDescription {
    /// Formats the table for inclusion in a hint prompt.
    ///
    /// ```text
    /// Table: customers
    ///   - id (integer)
    ///   - email (character varying) NULL
    /// ```
    pub fn format_for_hint(&self) -> String {
        let column_lines = self
            .columns
            .iter()
            .map(|column| {
                let nullable = if column.is_nullable { " NULL" } else { "" };
                format!("  - {} ({}){}\n", column.name, column.data_type, nullable)
            })
            .collect::<Vec<_>>()
            .join("");

        format!("Table: {}\n{}", self.name, column_lines)
    }
}

/// Formats several tables, separated by blank lines.
pub fn format_tables_for_hint(tables: &[TableDescription]) -> String {
    tables
        .iter()
        .map(TableDescription::format_for_hint)
        .collect::<Vec<_>>()
        .join("\n")
}
