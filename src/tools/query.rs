//! Query tools.
//!
//! `run_query` sends SQL through the executor under the configured
//! auto-commit policy. `last_result` re-renders the retained result and
//! `export_result` writes it to a file.

use crate::error::DbResult;
use crate::models::{ColumnMetadata, QueryResult, RunOutcome};
use crate::session::Workbench;
use crate::tools::export::{self, ExportFormat, ExportSummary};
use crate::tools::format::{OutputFormat, format_as_markdown, format_as_table};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// Input for the run_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunQueryInput {
    /// SQL to run. Several statements separated by ';' run as a batch; only
    /// the last statement's result is reported.
    pub sql: String,
    /// Connection ID from list_connections. Defaults to the active connection.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Output format: "json" returns structured data, "table" returns ASCII table, "markdown" returns markdown table
    #[serde(default)]
    pub format: OutputFormat,
}

/// Input for the last_result tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct LastResultInput {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Input for the export_result tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExportInput {
    /// Destination file path
    pub path: PathBuf,
    /// "csv" or "json"
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Rows,
    Command,
    Transaction,
}

/// Output from the run_query and last_result tools.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryOutput {
    pub kind: OutcomeKind,
    /// Human-readable status message
    pub message: String,
    /// Column metadata. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnMetadata>,
    /// Result rows keyed by column name. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Pre-formatted output when format is table or markdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Transaction state of the connection after the statement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_transaction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncommitted_count: Option<u64>,
}

/// Output from the last_result tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct LastResultOutput {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryOutput>,
}

impl QueryOutput {
    fn from_result(result: &QueryResult, message: String, format: OutputFormat) -> Self {
        let (columns, rows, formatted) = match format {
            OutputFormat::Json => (result.columns.clone(), result.rows.clone(), None),
            OutputFormat::Table => (Vec::new(), Vec::new(), Some(format_as_table(result))),
            OutputFormat::Markdown => (Vec::new(), Vec::new(), Some(format_as_markdown(result))),
        };
        Self {
            kind: OutcomeKind::Rows,
            message,
            columns,
            rows,
            formatted,
            row_count: result.row_count(),
            rows_affected: None,
            execution_time_ms: Some(result.execution_time_ms),
            in_transaction: None,
            uncommitted_count: None,
        }
    }

    pub fn from_outcome(outcome: &RunOutcome, format: OutputFormat) -> Self {
        let message = outcome.message();
        match outcome {
            RunOutcome::Rows(result) => Self::from_result(result, message, format),
            RunOutcome::Command {
                rows_affected,
                execution_time_ms,
                ..
            } => Self {
                rows_affected: Some(*rows_affected),
                execution_time_ms: Some(*execution_time_ms),
                ..Self::bare(OutcomeKind::Command, message)
            },
            RunOutcome::Transaction { .. } => Self::bare(OutcomeKind::Transaction, message),
        }
    }

    fn bare(kind: OutcomeKind, message: String) -> Self {
        Self {
            kind,
            message,
            columns: Vec::new(),
            rows: Vec::new(),
            formatted: None,
            row_count: 0,
            rows_affected: None,
            execution_time_ms: None,
            in_transaction: None,
            uncommitted_count: None,
        }
    }
}

/// Handler for query tools.
pub struct QueryToolHandler {
    workbench: Workbench,
}

impl QueryToolHandler {
    pub fn new(workbench: Workbench) -> Self {
        Self { workbench }
    }

    pub async fn run_query(&self, input: RunQueryInput) -> DbResult<QueryOutput> {
        let connection_id = self.workbench.resolve(input.connection_id.as_deref())?;
        let outcome = self.workbench.run_on(&input.sql, &connection_id).await?;

        let mut output = QueryOutput::from_outcome(&outcome, input.format);
        if let Some((in_transaction, uncommitted)) =
            self.workbench.transaction_state(&connection_id).await
        {
            output.in_transaction = Some(in_transaction);
            output.uncommitted_count = Some(uncommitted);
        }
        Ok(output)
    }

    pub async fn last_result(&self, input: LastResultInput) -> DbResult<LastResultOutput> {
        let output = match self.workbench.last_result().await {
            Some(result) => {
                let outcome = RunOutcome::Rows(result);
                LastResultOutput {
                    message: outcome.message(),
                    result: Some(QueryOutput::from_outcome(&outcome, input.format)),
                }
            }
            None => LastResultOutput {
                message: "No query result yet".to_string(),
                result: None,
            },
        };
        Ok(output)
    }

    pub async fn export_result(&self, input: ExportInput) -> DbResult<ExportSummary> {
        let last = self.workbench.last_result().await;
        export::write_export(last.as_deref(), input.format, &input.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_command_output() {
        let outcome = RunOutcome::Command {
            verb: "DELETE".into(),
            rows_affected: 4,
            execution_time_ms: 3,
        };
        let output = QueryOutput::from_outcome(&outcome, OutputFormat::Table);
        assert_eq!(output.kind, OutcomeKind::Command);
        assert_eq!(output.rows_affected, Some(4));
        assert!(output.formatted.is_none());
        assert_eq!(output.message, "DELETE executed successfully, 4 row(s) affected");
    }

    #[test]
    fn test_table_output_drops_structured_rows() {
        let result = QueryResult {
            columns: vec![ColumnMetadata::new("n", None)],
            rows: vec![json!({"n": 1}).as_object().cloned().unwrap()],
            execution_time_ms: 0,
        };
        let outcome = RunOutcome::Rows(Arc::new(result));

        let table = QueryOutput::from_outcome(&outcome, OutputFormat::Table);
        assert!(table.rows.is_empty());
        assert!(table.formatted.unwrap().contains("1 row in set"));

        let json_out = QueryOutput::from_outcome(&outcome, OutputFormat::Json);
        assert_eq!(json_out.row_count, 1);
        assert_eq!(json_out.columns[0].name, "n");
    }
}
