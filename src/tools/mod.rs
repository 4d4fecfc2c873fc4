//! MCP tool implementations.
//!
//! - `connection`: list, connect, disconnect, test, select and remove connections
//! - `query`: run SQL, re-read and export the last result
//! - `transaction`: begin, commit, rollback
//! - `schema`: list schemas and tables
//! - `format` / `export`: rendering and file export of results

pub mod connection;
pub mod export;
pub mod format;
pub mod query;
pub mod schema;
pub mod transaction;

pub use connection::{ConnectionIdInput, ConnectionToolHandler};
pub use export::{ExportFormat, ExportSummary};
pub use format::OutputFormat;
pub use query::{
    ExportInput, LastResultInput, LastResultOutput, QueryOutput, QueryToolHandler, RunQueryInput,
};
pub use schema::{ListSchemasInput, ListTablesInput, SchemaToolHandler};
pub use transaction::{TransactionInput, TransactionOutput, TransactionToolHandler};
