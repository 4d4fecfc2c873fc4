//! Export of the retained result to CSV or JSON files.

use crate::error::{DbError, DbResult};
use crate::models::QueryResult;
use schemars::JsonSchema;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Header row then one line per row; NULL is an empty field
    Csv,
    /// Array of row objects; NULL stays null
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn csv_value(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => csv_field(s),
        Some(other) => csv_field(&other.to_string()),
    }
}

pub fn to_csv(result: &QueryResult) -> String {
    let mut out = result
        .columns
        .iter()
        .map(|c| csv_field(&c.name))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for row in &result.rows {
        let line = result
            .columns
            .iter()
            .map(|c| csv_value(row.get(&c.name)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Rows serialized with keys in column order.
struct OrderedRows<'a>(&'a QueryResult);

struct OrderedRow<'a> {
    result: &'a QueryResult,
    row: &'a serde_json::Map<String, JsonValue>,
}

impl Serialize for OrderedRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for row in &self.0.rows {
            seq.serialize_element(&OrderedRow { result: self.0, row })?;
        }
        seq.end()
    }
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.result.columns.len()))?;
        for column in &self.result.columns {
            let value = self.row.get(&column.name).unwrap_or(&JsonValue::Null);
            map.serialize_entry(&column.name, value)?;
        }
        map.end()
    }
}

pub fn to_json(result: &QueryResult) -> DbResult<String> {
    serde_json::to_string_pretty(&OrderedRows(result)).map_err(|e| DbError::export(e.to_string()))
}

/// What an export wrote.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExportSummary {
    pub path: String,
    pub format: ExportFormat,
    pub row_count: usize,
    pub bytes: usize,
}

/// Write `result` to `path`. `None` means nothing has been queried yet.
pub fn write_export(
    result: Option<&QueryResult>,
    format: ExportFormat,
    path: &Path,
) -> DbResult<ExportSummary> {
    let result = result.ok_or_else(|| DbError::export("no query result to export yet"))?;
    if result.has_no_columns() {
        return Err(DbError::export("the last result has no columns"));
    }

    let body = match format {
        ExportFormat::Csv => to_csv(result),
        ExportFormat::Json => to_json(result)?,
    };
    std::fs::write(path, &body)
        .map_err(|e| DbError::export(format!("cannot write {}: {e}", path.display())))?;

    info!(
        path = %path.display(),
        format = format.extension(),
        rows = result.row_count(),
        "Result exported"
    );
    Ok(ExportSummary {
        path: path.display().to_string(),
        format,
        row_count: result.row_count(),
        bytes: body.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMetadata;
    use serde_json::json;
    use tempfile::TempDir;

    fn result() -> QueryResult {
        let rows = [
            json!({"id": 1, "note": "plain"}),
            json!({"id": 2, "note": "has, comma and \"quotes\""}),
            json!({"id": 3, "note": null}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        QueryResult {
            columns: vec![
                ColumnMetadata::new("note", None),
                ColumnMetadata::new("id", None),
            ],
            rows,
            execution_time_ms: 0,
        }
    }

    #[test]
    fn test_csv_quoting_and_nulls() {
        assert_eq!(
            to_csv(&result()),
            "note,id\nplain,1\n\"has, comma and \"\"quotes\"\"\",2\n,3\n"
        );
    }

    #[test]
    fn test_json_keeps_column_order_and_nulls() {
        let text = to_json(&result()).unwrap();
        let note = text.find("\"note\"").unwrap();
        let id = text.find("\"id\"").unwrap();
        assert!(note < id);

        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[2], json!({"note": null, "id": 3}));
    }

    #[test]
    fn test_nothing_to_export() {
        let dir = TempDir::new().unwrap();
        let err = write_export(None, ExportFormat::Csv, &dir.path().join("x.csv")).unwrap_err();
        assert!(matches!(err, DbError::Export { .. }));
    }

    #[test]
    fn test_write_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let summary = write_export(Some(&result()), ExportFormat::Json, &path).unwrap();
        assert_eq!(summary.row_count, 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap().len(), summary.bytes);
    }
}
