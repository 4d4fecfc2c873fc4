//! Output formatting for tabular results.
//!
//! Headers show the column name with its type name beneath it when the
//! backend reports one.

use crate::models::{ColumnMetadata, QueryResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// ASCII table format (like MySQL CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

/// Header lines per column: the name, then the type name if known.
fn header_lines(columns: &[ColumnMetadata]) -> Vec<Vec<String>> {
    columns
        .iter()
        .map(|c| c.header_label().lines().map(String::from).collect())
        .collect()
}

fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = width.saturating_sub(text.width());
    match align {
        Align::Left => format!("{text}{}", " ".repeat(fill)),
        Align::Right => format!("{}{text}", " ".repeat(fill)),
        Align::Center => {
            let left = fill / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(fill - left))
        }
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

/// Format a result as an ASCII table (MySQL CLI style).
pub fn format_as_table(result: &QueryResult) -> String {
    if result.has_no_columns() {
        return "Empty set".to_string();
    }
    let columns = &result.columns;
    let headers = header_lines(columns);

    // Widths come from the display width, not the byte length
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|lines| lines.iter().map(|l| l.width()).max().unwrap_or(0))
        .collect();
    for row in &result.rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(&col.name) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    let header_height = headers.iter().map(Vec::len).max().unwrap_or(1);
    for line in 0..header_height {
        let header: String = headers
            .iter()
            .zip(&widths)
            .map(|(lines, w)| {
                let text = lines.get(line).map(String::as_str).unwrap_or("");
                format!("| {} ", pad(text, *w, Align::Center))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&header);
    }
    output.push_str(&separator);

    for row in &result.rows {
        let line: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
                let align = if value.is_number() {
                    Align::Right
                } else {
                    Align::Left
                };
                format!("| {} ", pad(&format_value(value), *w, align))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }
    output.push_str(&separator);

    let row_count = result.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        row_count,
        row_text,
        result.execution_time_ms as f64 / 1000.0
    ));
    output
}

/// Format a result as a Markdown table.
pub fn format_as_markdown(result: &QueryResult) -> String {
    if result.has_no_columns() {
        return "*Empty set*".to_string();
    }
    let columns = &result.columns;

    let mut output: String = header_lines(columns)
        .iter()
        .map(|lines| format!("| {} ", lines.join("<br>")))
        .collect::<String>()
        + "|\n";
    output.push_str(&(columns.iter().map(|_| "|---").collect::<String>() + "|\n"));

    for row in &result.rows {
        let line: String = columns
            .iter()
            .map(|col| {
                let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
                // Pipes would end the cell early
                format!("| {} ", format_value(value).replace('|', "\\|"))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&format!("\n*{} rows*", result.row_count()));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueryResult {
        let mut row = serde_json::Map::new();
        row.insert("id".into(), json!(7));
        row.insert("name".into(), json!("日本"));
        let mut empty = serde_json::Map::new();
        empty.insert("id".into(), json!(12));
        empty.insert("name".into(), JsonValue::Null);
        QueryResult {
            columns: vec![
                ColumnMetadata::new("id", Some("INT4".into())),
                ColumnMetadata::new("name", Some("TEXT".into())),
            ],
            rows: vec![row, empty],
            execution_time_ms: 20,
        }
    }

    #[test]
    fn test_table_has_type_line_under_names() {
        let table = format_as_table(&sample());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[1], "|  id  | name |");
        assert_eq!(lines[2], "| INT4 | TEXT |");
        assert_eq!(lines[4], "|    7 | 日本 |");
        assert_eq!(lines[5], "|   12 | NULL |");
        assert!(table.ends_with("2 rows in set (0.02 sec)\n"));
    }

    #[test]
    fn test_table_without_type_names() {
        let mut result = sample();
        for col in &mut result.columns {
            col.type_name = None;
        }
        let table = format_as_table(&result);
        // One header line between the first two separators
        assert_eq!(table.lines().nth(2).unwrap(), "+----+------+");
    }

    #[test]
    fn test_markdown() {
        let md = format_as_markdown(&sample());
        assert!(md.starts_with("| id<br>INT4 | name<br>TEXT |\n|---|---|\n"));
        assert!(md.contains("| 12 | NULL |"));
        assert!(md.ends_with("*2 rows*"));
    }

    #[test]
    fn test_zero_columns() {
        let result = QueryResult::default();
        assert_eq!(format_as_table(&result), "Empty set");
        assert_eq!(format_as_markdown(&result), "*Empty set*");
    }
}
