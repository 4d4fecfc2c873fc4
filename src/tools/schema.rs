//! Schema browsing tools.
//!
//! This module implements the `list_schemas` and `list_tables` MCP tools.

use crate::error::DbResult;
use crate::models::SchemaTables;
use crate::session::Workbench;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the list_schemas tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListSchemasInput {
    /// Connection ID from list_connections. Defaults to the active connection.
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListSchemasOutput {
    pub schemas: Vec<String>,
    pub count: usize,
}

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Connection ID from list_connections. Defaults to the active connection.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Only this schema (PostgreSQL), or the current database (MySQL)
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub groups: Vec<SchemaTables>,
    /// Total tables across all groups
    pub count: usize,
}

/// Handler for schema browsing tools.
pub struct SchemaToolHandler {
    workbench: Workbench,
}

impl SchemaToolHandler {
    pub fn new(workbench: Workbench) -> Self {
        Self { workbench }
    }

    pub async fn list_schemas(&self, input: ListSchemasInput) -> DbResult<ListSchemasOutput> {
        let schemas = self
            .workbench
            .list_schemas(input.connection_id.as_deref())
            .await?;
        Ok(ListSchemasOutput {
            count: schemas.len(),
            schemas,
        })
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> DbResult<ListTablesOutput> {
        let groups = self
            .workbench
            .list_tables(input.connection_id.as_deref(), input.schema.as_deref())
            .await?;
        Ok(ListTablesOutput {
            count: groups.iter().map(|g| g.tables.len()).sum(),
            groups,
        })
    }
}
