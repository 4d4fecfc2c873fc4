//! Data models shared across querydeck.

pub mod connection;
pub mod query;
pub mod schema;

pub use connection::{ConnectionProfile, ConnectionStatus, DatabaseType, ProfileError};
pub use query::{ColumnMetadata, DEFAULT_ROW_LIMIT, QueryResult, RunOutcome, TxCommand};
pub use schema::SchemaTables;
