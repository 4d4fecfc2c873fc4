//! Schema browsing models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The base tables of one schema.
///
/// PostgreSQL reports one group per user schema. MySQL reports a single group
/// named after the current database. SQLite has no schema level, so its single
/// group carries `schema: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaTables {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub tables: Vec<String>,
}

impl SchemaTables {
    pub fn new(schema: Option<String>, tables: Vec<String>) -> Self {
        Self { schema, tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
