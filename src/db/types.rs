//! Result normalization.
//!
//! Every backend's rows end up in the same shape: one JSON object per row,
//! keyed by column name, with SQL NULL as an explicit `null`, plus a column
//! list carrying a human-readable type name.
//!
//! # Type names
//!
//! Type names come from static tables keyed by the wire-level type code:
//! the PostgreSQL OID of the column type and the MySQL protocol field type.
//! Unknown codes render as `OID(<code>)` / `UNKNOWN(<code>)`. SQLite has no
//! column type metadata, so its columns carry no type name.
//!
//! # Values
//!
//! Ad-hoc statements are sent without bind arguments, which makes both
//! PostgreSQL and MySQL answer in their text format. Values are therefore
//! read as text (or bytes for binary columns) and converted by
//! `TypeCategory`. SQLite values are converted by their runtime storage class.

use crate::models::{ColumnMetadata, DatabaseType, QueryResult};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlColumn, MySqlRow};
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

// =============================================================================
// PostgreSQL type table
// =============================================================================

/// Builtin PostgreSQL type name for an OID.
pub fn pg_type_name(oid: u32) -> String {
    let name = match oid {
        16 => "BOOL",
        17 => "BYTEA",
        18 => "CHAR",
        19 => "NAME",
        20 => "INT8",
        21 => "INT2",
        22 => "INT2VECTOR",
        23 => "INT4",
        24 => "REGPROC",
        25 => "TEXT",
        26 => "OID",
        27 => "TID",
        28 => "XID",
        29 => "CID",
        30 => "OIDVECTOR",
        114 => "JSON",
        142 => "XML",
        194 => "PG_NODE_TREE",
        600 => "POINT",
        601 => "LSEG",
        602 => "PATH",
        603 => "BOX",
        604 => "POLYGON",
        628 => "LINE",
        650 => "CIDR",
        700 => "FLOAT4",
        701 => "FLOAT8",
        718 => "CIRCLE",
        774 => "MACADDR8",
        790 => "MONEY",
        829 => "MACADDR",
        869 => "INET",
        1000 => "_BOOL",
        1005 => "_INT2",
        1007 => "_INT4",
        1009 => "_TEXT",
        1016 => "_INT8",
        1021 => "_FLOAT4",
        1022 => "_FLOAT8",
        1033 => "ACLITEM",
        1015 => "_VARCHAR",
        1042 => "BPCHAR",
        1043 => "VARCHAR",
        1082 => "DATE",
        1083 => "TIME",
        1114 => "TIMESTAMP",
        1184 => "TIMESTAMPTZ",
        1186 => "INTERVAL",
        1266 => "TIMETZ",
        1560 => "BIT",
        1562 => "VARBIT",
        1700 => "NUMERIC",
        1790 => "REFCURSOR",
        2202 => "REGPROCEDURE",
        2203 => "REGOPER",
        2204 => "REGOPERATOR",
        2205 => "REGCLASS",
        2206 => "REGTYPE",
        2249 => "RECORD",
        2275 => "CSTRING",
        2278 => "VOID",
        2950 => "UUID",
        2951 => "_UUID",
        2970 => "TXID_SNAPSHOT",
        3220 => "PG_LSN",
        3614 => "TSVECTOR",
        3615 => "TSQUERY",
        3642 => "GTSVECTOR",
        3734 => "REGCONFIG",
        3769 => "REGDICTIONARY",
        3802 => "JSONB",
        3807 => "_JSONB",
        3904 => "INT4RANGE",
        3906 => "NUMRANGE",
        3908 => "TSRANGE",
        3910 => "TSTZRANGE",
        3912 => "DATERANGE",
        3926 => "INT8RANGE",
        4089 => "REGNAMESPACE",
        4096 => "REGROLE",
        _ => return format!("OID({})", oid),
    };
    name.to_string()
}

fn pg_column_type(column: &PgColumn) -> String {
    let info = column.type_info();
    match info.oid() {
        Some(oid) => pg_type_name(oid.0),
        // Types sqlx could not resolve to an OID (user-declared by name)
        None => info.name().to_uppercase(),
    }
}

// =============================================================================
// MySQL type table
// =============================================================================

/// MySQL protocol field type name for a type code.
pub fn mysql_type_name(code: u16) -> String {
    let name = match code {
        0 => "DECIMAL",
        1 => "TINY",
        2 => "SHORT",
        3 => "LONG",
        4 => "FLOAT",
        5 => "DOUBLE",
        6 => "NULL",
        7 => "TIMESTAMP",
        8 => "LONGLONG",
        9 => "INT24",
        10 => "DATE",
        11 => "TIME",
        12 => "DATETIME",
        13 => "YEAR",
        14 => "NEWDATE",
        15 => "VARCHAR",
        16 => "BIT",
        17 => "TIMESTAMP2",
        18 => "DATETIME2",
        19 => "TIME2",
        245 => "JSON",
        246 => "NEWDECIMAL",
        247 => "ENUM",
        248 => "SET",
        249 => "TINY_BLOB",
        250 => "MEDIUM_BLOB",
        251 => "LONG_BLOB",
        252 => "BLOB",
        253 => "VAR_STRING",
        254 => "STRING",
        255 => "GEOMETRY",
        _ => return format!("UNKNOWN({})", code),
    };
    name.to_string()
}

/// Protocol type code for a sqlx MySQL type name.
///
/// sqlx only exposes the SQL-level name; it is derived from the protocol
/// code plus column flags, so the mapping back is unambiguous for the
/// storage type.
pub fn mysql_type_code(sqlx_name: &str) -> Option<u16> {
    let base = sqlx_name.trim_end_matches(" UNSIGNED");
    let code = match base {
        "TINYINT" | "BOOLEAN" => 1,
        "SMALLINT" => 2,
        "INT" => 3,
        "FLOAT" => 4,
        "DOUBLE" => 5,
        "NULL" => 6,
        "TIMESTAMP" => 7,
        "BIGINT" => 8,
        "MEDIUMINT" => 9,
        "DATE" => 10,
        "TIME" => 11,
        "DATETIME" => 12,
        "YEAR" => 13,
        "BIT" => 16,
        "JSON" => 245,
        "DECIMAL" => 246,
        "ENUM" => 247,
        "SET" => 248,
        "TINYBLOB" | "TINYTEXT" => 249,
        "MEDIUMBLOB" | "MEDIUMTEXT" => 250,
        "LONGBLOB" | "LONGTEXT" => 251,
        "BLOB" | "TEXT" => 252,
        "VARCHAR" | "VARBINARY" => 253,
        "CHAR" | "BINARY" => 254,
        "GEOMETRY" => 255,
        _ => return None,
    };
    Some(code)
}

fn mysql_column_type(column: &MySqlColumn) -> String {
    let name = column.type_info().name();
    match mysql_type_code(name) {
        Some(code) => mysql_type_name(code),
        None => name.to_string(),
    }
}

// =============================================================================
// Column metadata
// =============================================================================

/// Column metadata for PostgreSQL columns (row or describe output).
pub fn pg_columns(columns: &[PgColumn]) -> Vec<ColumnMetadata> {
    columns
        .iter()
        .map(|c| ColumnMetadata::new(c.name(), Some(pg_column_type(c))))
        .collect()
}

/// Column metadata for MySQL columns (row or describe output).
pub fn mysql_columns(columns: &[MySqlColumn]) -> Vec<ColumnMetadata> {
    columns
        .iter()
        .map(|c| ColumnMetadata::new(c.name(), Some(mysql_column_type(c))))
        .collect()
}

// =============================================================================
// Value conversion
// =============================================================================

/// Logical category used to convert a textual value into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    /// Kept as a string to preserve exact precision
    Decimal,
    Boolean,
    Binary,
    Json,
    Text,
}

/// Classify a backend type name.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.trim_end_matches(" UNSIGNED");

    match base {
        "BOOL" | "BOOLEAN" => TypeCategory::Boolean,
        "INT2" | "INT4" | "INT8" | "OID" | "SMALLINT" | "INT" | "INTEGER" | "BIGINT"
        | "TINYINT" | "MEDIUMINT" | "YEAR" => TypeCategory::Integer,
        "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE" | "REAL" => TypeCategory::Float,
        "NUMERIC" | "DECIMAL" => match db {
            DatabaseType::Sqlite => TypeCategory::Float,
            _ => TypeCategory::Decimal,
        },
        "JSON" | "JSONB" => TypeCategory::Json,
        "BYTEA" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            TypeCategory::Binary
        }
        _ => TypeCategory::Text,
    }
}

/// Binary data as base64.
pub fn binary_to_json(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_to_json(v: f64, original: &str) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(original.to_string()))
}

/// Convert a text-format value by category, falling back to the string.
pub fn text_to_json(text: String, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => {
            if let Ok(v) = text.parse::<i64>() {
                return JsonValue::Number(v.into());
            }
            if let Ok(v) = text.parse::<u64>() {
                return JsonValue::Number(v.into());
            }
            JsonValue::String(text)
        }
        TypeCategory::Float => match text.parse::<f64>() {
            Ok(v) => float_to_json(v, &text),
            Err(_) => JsonValue::String(text),
        },
        TypeCategory::Boolean => match text.as_str() {
            "t" | "true" | "TRUE" | "1" => JsonValue::Bool(true),
            "f" | "false" | "FALSE" | "0" => JsonValue::Bool(false),
            _ => JsonValue::String(text),
        },
        TypeCategory::Json => serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
        TypeCategory::Decimal | TypeCategory::Binary | TypeCategory::Text => {
            JsonValue::String(text)
        }
    }
}

/// Decode one cell of a text-protocol row (PostgreSQL, MySQL).
fn decode_text_protocol<'r, R>(row: &'r R, idx: usize, category: TypeCategory) -> JsonValue
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database>,
    Vec<u8>: sqlx::Decode<'r, R::Database>,
{
    // Unchecked: the declared column type is irrelevant to text decoding.
    let decoded = match category {
        TypeCategory::Binary => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|bytes| binary_to_json(&bytes))),
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .map(|v| v.map(|text| text_to_json(text, category))),
    };
    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::warn!(column = idx, error = %e, "Failed to decode column value");
            JsonValue::Null
        }
    }
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Converts a backend row into the normalized shape.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::Postgres);
                (
                    col.name().to_string(),
                    decode_text_protocol(self, idx, category),
                )
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        pg_columns(self.columns())
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySql);
                (
                    col.name().to_string(),
                    decode_text_protocol(self, idx, category),
                )
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        mysql_columns(self.columns())
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), sqlite::decode_cell(self, idx)))
            .collect()
    }

    /// Names only, taken from the row itself.
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), None))
            .collect()
    }
}

mod sqlite {
    use super::*;

    /// Decode by the value's runtime storage class.
    pub fn decode_cell(row: &SqliteRow, idx: usize) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read SQLite value");
                return JsonValue::Null;
            }
        };

        match storage.as_str() {
            "INTEGER" => row
                .try_get_unchecked::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(|v| float_to_json(v, &v.to_string()))
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| binary_to_json(&v))
                .unwrap_or(JsonValue::Null),
            _ => decode_fallback(row, idx),
        }
    }

    /// Text first, then the numeric storage classes.
    fn decode_fallback(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get_unchecked::<String, _>(idx) {
            return JsonValue::String(v);
        }
        if let Ok(v) = row.try_get_unchecked::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get_unchecked::<f64, _>(idx) {
            return float_to_json(v, &v.to_string());
        }
        JsonValue::Null
    }
}

/// Build a `QueryResult` from rows.
///
/// Columns come from the first row; when there are no rows, from `described`
/// (PostgreSQL and MySQL can describe a statement). SQLite passes `None`, so
/// an empty SQLite result has zero columns.
pub fn normalize_rows<R: RowToJson>(
    rows: &[R],
    described: Option<Vec<ColumnMetadata>>,
    execution_time_ms: u64,
) -> QueryResult {
    let columns = match rows.first() {
        Some(first) => first.column_metadata(),
        None => described.unwrap_or_default(),
    };
    QueryResult {
        columns,
        rows: rows.iter().map(RowToJson::to_json_map).collect(),
        execution_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Connection, SqliteConnection};

    #[test]
    fn test_pg_type_table() {
        assert_eq!(pg_type_name(23), "INT4");
        assert_eq!(pg_type_name(1043), "VARCHAR");
        assert_eq!(pg_type_name(3802), "JSONB");
        assert_eq!(pg_type_name(999_999), "OID(999999)");
    }

    #[test]
    fn test_mysql_type_table() {
        assert_eq!(mysql_type_name(3), "LONG");
        assert_eq!(mysql_type_name(253), "VAR_STRING");
        assert_eq!(mysql_type_name(100), "UNKNOWN(100)");
    }

    #[test]
    fn test_mysql_type_code_from_sqlx_name() {
        assert_eq!(mysql_type_code("INT"), Some(3));
        assert_eq!(mysql_type_code("BIGINT UNSIGNED"), Some(8));
        assert_eq!(mysql_type_code("VARCHAR"), Some(253));
        assert_eq!(mysql_type_code("DECIMAL"), Some(246));
        assert_eq!(mysql_type_code("SOMETHING"), None);
    }

    #[test]
    fn test_categorize_type() {
        use DatabaseType::*;
        assert_eq!(categorize_type("INT4", Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED", MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BOOLEAN", MySql), TypeCategory::Boolean);
        assert_eq!(categorize_type("NUMERIC", Postgres), TypeCategory::Decimal);
        assert_eq!(categorize_type("numeric", Sqlite), TypeCategory::Float);
        assert_eq!(categorize_type("JSONB", Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("BYTEA", Postgres), TypeCategory::Binary);
        // Contains "INT" but is not an integer
        assert_eq!(categorize_type("POINT", Postgres), TypeCategory::Text);
        assert_eq!(categorize_type("INTERVAL", Postgres), TypeCategory::Text);
    }

    #[test]
    fn test_text_to_json() {
        assert_eq!(
            text_to_json("42".into(), TypeCategory::Integer),
            JsonValue::from(42)
        );
        assert_eq!(
            text_to_json("18446744073709551615".into(), TypeCategory::Integer),
            JsonValue::from(u64::MAX)
        );
        assert_eq!(
            text_to_json("t".into(), TypeCategory::Boolean),
            JsonValue::Bool(true)
        );
        assert_eq!(
            text_to_json("NaN".into(), TypeCategory::Float),
            JsonValue::String("NaN".into())
        );
        assert_eq!(
            text_to_json("12.50".into(), TypeCategory::Decimal),
            JsonValue::String("12.50".into())
        );
        assert_eq!(
            text_to_json("{\"a\":1}".into(), TypeCategory::Json),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_binary_to_json() {
        assert_eq!(
            binary_to_json(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(binary_to_json(&[]), JsonValue::String(String::new()));
    }

    #[tokio::test]
    async fn test_sqlite_rows_normalize_by_storage_class() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let rows: Vec<SqliteRow> =
            sqlx::query("SELECT 1 AS i, 2.5 AS r, 'x' AS s, NULL AS n, X'FF00' AS b")
                .fetch_all(&mut conn)
                .await
                .unwrap();

        let result = normalize_rows(&rows, None, 0);
        assert_eq!(result.column_names(), vec!["i", "r", "s", "n", "b"]);
        assert!(result.columns.iter().all(|c| c.type_name.is_none()));
        let row = &result.rows[0];
        assert_eq!(row["i"], JsonValue::from(1));
        assert_eq!(row["r"], JsonValue::from(2.5));
        assert_eq!(row["s"], JsonValue::from("x"));
        assert_eq!(row["n"], JsonValue::Null);
        assert_eq!(row["b"], JsonValue::from("/wA="));
    }

    #[test]
    fn test_no_rows_uses_described_columns() {
        let described = vec![ColumnMetadata::new("id", Some("INT4".into()))];
        let result = normalize_rows::<SqliteRow>(&[], Some(described.clone()), 3);
        assert_eq!(result.columns, described);
        assert_eq!(result.row_count(), 0);

        let result = normalize_rows::<SqliteRow>(&[], None, 3);
        assert!(result.has_no_columns());
    }
}
