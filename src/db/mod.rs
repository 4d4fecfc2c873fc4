//! Database layer.
//!
//! - `adapter`: one uniform async surface over the PostgreSQL, MySQL and
//!   SQLite drivers
//! - `registry`: live connections keyed by profile id
//! - `transaction`: begin/commit/rollback and the auto-commit policy
//! - `executor`: the query pipeline
//! - `types`: result normalization and type-name tables
//! - `statement`: lightweight SQL sniffing
//! - `schema`: schema and table browsing

pub mod adapter;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod statement;
pub mod transaction;
pub mod types;

pub use adapter::{BackendHandle, TxEnd};
pub use executor::QueryExecutor;
pub use registry::{ConnectionRegistry, ConnectionState, DisconnectReport, SharedState};
pub use schema::SchemaBrowser;
pub use transaction::{AutoCommitPolicy, TransactionCoordinator};
