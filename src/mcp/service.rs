//! MCP service implementation using rmcp.
//!
//! `QueryDeckService` exposes the workbench as MCP tools. Every tool that
//! takes an optional `connection_id` falls back to the active connection.

use crate::models::TxCommand;
use crate::session::Workbench;
use crate::tools::connection::{
    ConnectOutput, ConnectionIdInput, ConnectionToolHandler, DisconnectOutput,
    ListConnectionsOutput, TestConnectionOutput, UseConnectionOutput,
};
use crate::tools::query::{
    ExportInput, LastResultInput, LastResultOutput, QueryOutput, QueryToolHandler, RunQueryInput,
};
use crate::tools::schema::{
    ListSchemasInput, ListSchemasOutput, ListTablesInput, ListTablesOutput, SchemaToolHandler,
};
use crate::tools::transaction::{TransactionInput, TransactionOutput, TransactionToolHandler};
use crate::tools::ExportSummary;
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};

#[derive(Clone)]
pub struct QueryDeckService {
    workbench: Workbench,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl QueryDeckService {
    pub fn new(workbench: Workbench) -> Self {
        Self {
            workbench,
            tool_router: Self::tool_router(),
        }
    }

    pub fn workbench(&self) -> &Workbench {
        &self.workbench
    }

    /// Trim a required connection id, rejecting blanks before any lookup.
    fn validate_connection_id(&self, input: ConnectionIdInput) -> Result<ConnectionIdInput, McpError> {
        let trimmed = input.connection_id.trim();
        if trimmed.is_empty() {
            Err(McpError::invalid_params(
                "connection_id is required. Call list_connections first to get available connection IDs.",
                None,
            ))
        } else {
            Ok(ConnectionIdInput {
                connection_id: trimmed.to_string(),
            })
        }
    }

    fn connections(&self) -> ConnectionToolHandler {
        ConnectionToolHandler::new(self.workbench.clone())
    }

    fn queries(&self) -> QueryToolHandler {
        QueryToolHandler::new(self.workbench.clone())
    }

    fn transactions(&self) -> TransactionToolHandler {
        TransactionToolHandler::new(self.workbench.clone())
    }

    fn schemas(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.workbench.clone())
    }
}

#[tool_router]
impl QueryDeckService {
    #[tool(
        description = "List saved database connections.\nReturns IDs, types (MySQL/PostgreSQL/SQLite), whether each is connected or active, and open-transaction state."
    )]
    async fn list_connections(&self) -> Result<Json<ListConnectionsOutput>, McpError> {
        self.connections()
            .list_connections()
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Open a connection for a saved profile. Connecting twice is a no-op.")]
    async fn connect(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<ConnectOutput>, McpError> {
        let input = self.validate_connection_id(input)?;
        self.connections()
            .connect(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Close a connection. An open transaction is rolled back first and its uncommitted work is lost."
    )]
    async fn disconnect(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<DisconnectOutput>, McpError> {
        let input = self.validate_connection_id(input)?;
        self.connections()
            .disconnect(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Check that a saved profile can connect, without keeping the connection.")]
    async fn test_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<TestConnectionOutput>, McpError> {
        let input = self.validate_connection_id(input)?;
        self.connections()
            .test_connection(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Select the connection used when a tool call names none.")]
    async fn use_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<UseConnectionOutput>, McpError> {
        let input = self.validate_connection_id(input)?;
        self.connections()
            .use_connection(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Delete a saved connection profile. A live connection is closed first.")]
    async fn remove_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<DisconnectOutput>, McpError> {
        let input = self.validate_connection_id(input)?;
        self.connections()
            .remove_connection(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Run SQL on a connection.\nSELECTs without a LIMIT get the configured default limit.\nDepending on the auto-commit setting, a transaction may be opened implicitly; it stays open until commit or rollback.\nA failure inside a transaction rolls the whole transaction back.\nBEGIN/COMMIT/ROLLBACK typed as SQL are handled like the transaction tools.\nOutput format: json (default), table, or markdown."
    )]
    async fn run_query(
        &self,
        Parameters(input): Parameters<RunQueryInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        self.queries()
            .run_query(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Show the most recent row-returning result again.")]
    async fn last_result(
        &self,
        Parameters(input): Parameters<LastResultInput>,
    ) -> Result<Json<LastResultOutput>, McpError> {
        self.queries()
            .last_result(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Write the most recent row-returning result to a file as CSV (NULL as empty field) or JSON (array of row objects)."
    )]
    async fn export_result(
        &self,
        Parameters(input): Parameters<ExportInput>,
    ) -> Result<Json<ExportSummary>, McpError> {
        self.queries()
            .export_result(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Begin a transaction. No-op if one is already open on the connection.")]
    async fn begin_transaction(
        &self,
        Parameters(input): Parameters<TransactionInput>,
    ) -> Result<Json<TransactionOutput>, McpError> {
        self.transactions()
            .handle(TxCommand::Begin, input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Commit the open transaction. No-op if none is open.")]
    async fn commit(
        &self,
        Parameters(input): Parameters<TransactionInput>,
    ) -> Result<Json<TransactionOutput>, McpError> {
        self.transactions()
            .handle(TxCommand::Commit, input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Roll back the open transaction. No-op if none is open.")]
    async fn rollback(
        &self,
        Parameters(input): Parameters<TransactionInput>,
    ) -> Result<Json<TransactionOutput>, McpError> {
        self.transactions()
            .handle(TxCommand::Rollback, input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "List user schemas (PostgreSQL) or the current database (MySQL). Empty for SQLite.")]
    async fn list_schemas(
        &self,
        Parameters(input): Parameters<ListSchemasInput>,
    ) -> Result<Json<ListSchemasOutput>, McpError> {
        self.schemas()
            .list_schemas(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "List base tables grouped by schema.\nPostgreSQL can be narrowed with `schema`.")]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<ListTablesOutput>, McpError> {
        self.schemas()
            .list_tables(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for QueryDeckService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "querydeck".to_owned(),
                title: Some("querydeck".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run SQL against saved PostgreSQL, MySQL and SQLite connections.\n\
                \n\
                ## Workflow\n\
                1. Call `list_connections` to see saved connection IDs\n\
                2. `connect` the one you need, then `use_connection` to make it the default\n\
                3. `run_query` with SQL; `connection_id` may be omitted once a default is set\n\
                \n\
                ## Transactions\n\
                - Depending on the auto-commit setting (auto, off, smart) a transaction may be\n\
                  opened for you. `run_query` reports `in_transaction` and `uncommitted_count`.\n\
                - Finish with `commit` or `rollback`. Disconnecting rolls back.\n\
                - If a statement fails inside a transaction, the whole transaction is rolled back\n\
                  and the error says so.\n\
                \n\
                ## Results\n\
                - Only the latest row-returning result is kept: see `last_result` and\n\
                  `export_result`."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::settings::MemorySettings;
    use std::sync::Arc;

    fn create_test_service() -> QueryDeckService {
        let workbench = Workbench::new(Arc::new(MemorySettings::default()), PoolOptions::default());
        QueryDeckService::new(workbench)
    }

    #[test]
    fn test_validate_connection_id_trims_whitespace() {
        let service = create_test_service();
        let input = ConnectionIdInput {
            connection_id: "  mydb  ".into(),
        };
        assert_eq!(service.validate_connection_id(input).unwrap().connection_id, "mydb");
    }

    #[test]
    fn test_validate_connection_id_rejects_blank() {
        let service = create_test_service();
        let input = ConnectionIdInput {
            connection_id: "   ".into(),
        };
        let err = service.validate_connection_id(input).unwrap_err();
        assert!(err.to_string().contains("connection_id is required"));
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "querydeck");
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_run_query_without_active_connection() {
        let service = create_test_service();
        let err = service
            .run_query(Parameters(RunQueryInput {
                sql: "SELECT 1".into(),
                connection_id: None,
                format: Default::default(),
            }))
            .await
            .err()
            .expect("expected run_query to fail");
        assert_eq!(err.code.0, -32002);
    }
}
