//! querydeck library.
//!
//! Connection and transaction management plus a query pipeline for
//! PostgreSQL, MySQL and SQLite, exposed as MCP tools.
//!
//! - [`db`]: adapters, registry, transaction coordinator, executor
//! - [`session::Workbench`]: the caller-facing facade
//! - [`mcp`] and [`transport`]: the MCP front end

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod session;
pub mod settings;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use db::AutoCommitPolicy;
pub use error::{DbError, DbResult};
pub use mcp::QueryDeckService;
pub use session::Workbench;
