//! MCP server integration module.
//!
//! Exposes the workbench as MCP tools using the rmcp framework.

pub mod service;

pub use service::QueryDeckService;
