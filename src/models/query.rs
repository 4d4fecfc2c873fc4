//! Query-related data models.
//!
//! This module defines the normalized result shape shared by every backend.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Default row limit injected into SELECT-like statements.
pub const DEFAULT_ROW_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMetadata {
    pub name: String,
    /// Human-readable type name (e.g., "INT4", "VARCHAR"). SQLite has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_name,
        }
    }

    /// Column name with the type name beneath it, for display headers.
    pub fn header_label(&self) -> String {
        match &self.type_name {
            Some(t) => format!("{}\n{}", self.name, t),
            None => self.name.clone(),
        }
    }
}

/// A normalized row set.
///
/// Rows are keyed by column name; SQL NULL is an explicit `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when the statement ran but produced nothing tabular.
    pub fn has_no_columns(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A transaction-control statement or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxCommand {
    Begin,
    Commit,
    Rollback,
}

impl TxCommand {
    /// Verb used in error messages ("Failed to {verb} transaction").
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// What a single `run` produced.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Tabular result; also retained as the connection-wide last result.
    Rows(Arc<QueryResult>),
    /// Non-tabular statement (DML/DDL); nothing is retained.
    Command {
        verb: String,
        rows_affected: u64,
        execution_time_ms: u64,
    },
    /// A BEGIN/COMMIT/ROLLBACK handled by the transaction coordinator.
    /// `changed` is false when the request was a no-op.
    Transaction { command: TxCommand, changed: bool },
}

impl RunOutcome {
    /// The informational message shown to the user.
    pub fn message(&self) -> String {
        match self {
            Self::Rows(result) if result.has_no_columns() => {
                "Statement executed successfully, no columns returned.".to_string()
            }
            Self::Rows(result) => format!("{} row(s) returned", result.row_count()),
            Self::Command {
                verb,
                rows_affected,
                ..
            } => format!(
                "{} executed successfully, {} row(s) affected",
                verb, rows_affected
            ),
            Self::Transaction { command, changed } => match (command, changed) {
                (TxCommand::Begin, true) => "Transaction started".to_string(),
                (TxCommand::Begin, false) => "Transaction already in progress".to_string(),
                (TxCommand::Commit, true) => "Transaction committed".to_string(),
                (TxCommand::Rollback, true) => "Transaction rolled back".to_string(),
                (_, false) => "No transaction in progress".to_string(),
            },
        }
    }

    pub fn result(&self) -> Option<&Arc<QueryResult>> {
        match self {
            Self::Rows(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_label_puts_type_beneath_name() {
        let col = ColumnMetadata::new("id", Some("INT4".to_string()));
        assert_eq!(col.header_label(), "id\nINT4");
        let col = ColumnMetadata::new("id", None);
        assert_eq!(col.header_label(), "id");
    }

    #[test]
    fn test_zero_column_message() {
        let outcome = RunOutcome::Rows(Arc::new(QueryResult::default()));
        assert_eq!(
            outcome.message(),
            "Statement executed successfully, no columns returned."
        );
    }

    #[test]
    fn test_command_message() {
        let outcome = RunOutcome::Command {
            verb: "UPDATE".to_string(),
            rows_affected: 3,
            execution_time_ms: 1,
        };
        assert_eq!(
            outcome.message(),
            "UPDATE executed successfully, 3 row(s) affected"
        );
        assert!(outcome.result().is_none());
    }

    #[test]
    fn test_transaction_messages() {
        let noop = RunOutcome::Transaction {
            command: TxCommand::Commit,
            changed: false,
        };
        assert_eq!(noop.message(), "No transaction in progress");
        let begun = RunOutcome::Transaction {
            command: TxCommand::Begin,
            changed: true,
        };
        assert_eq!(begun.message(), "Transaction started");
    }
}
