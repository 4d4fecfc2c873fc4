//! Configuration handling for querydeck.
//!
//! CLI arguments with environment fallbacks. Connection profiles come either
//! from a JSON settings file (`--settings`) or from `--database` URLs.

use crate::db::AutoCommitPolicy;
use crate::models::{ConnectionProfile, DEFAULT_ROW_LIMIT, ProfileError};
use clap::Parser;
use std::path::PathBuf;

// Pool configuration defaults (PostgreSQL)
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// PostgreSQL pool options. MySQL and SQLite hold one persistent connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    pub max_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

impl PoolOptions {
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for querydeck.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "querydeck",
    about = "MCP server that runs SQL against PostgreSQL, MySQL and SQLite with managed transactions",
    version,
    author
)]
pub struct Config {
    /// JSON settings file holding connection profiles, the active connection
    /// and query defaults. Re-read on every operation.
    #[arg(long, value_name = "PATH", env = "QUERYDECK_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Connection profiles used when no settings file is given.
    /// Format: "connection_string" or "id=connection_string".
    /// Can be specified multiple times.
    #[arg(
        short = 'd',
        long = "database",
        value_name = "URL",
        env = "QUERYDECK_DATABASE",
        value_delimiter = ','
    )]
    pub databases: Vec<String>,

    /// Connection used when a query names none. Defaults to the first
    /// `--database` entry.
    #[arg(long, value_name = "ID", env = "QUERYDECK_ACTIVE")]
    pub active: Option<String>,

    /// When transactions are opened implicitly
    #[arg(long, value_enum, default_value_t = AutoCommitPolicy::Auto, env = "QUERYDECK_AUTO_COMMIT")]
    pub auto_commit: AutoCommitPolicy,

    /// LIMIT appended to SELECT statements without one (0 disables)
    #[arg(long, default_value_t = DEFAULT_ROW_LIMIT, env = "QUERYDECK_DEFAULT_LIMIT")]
    pub default_limit: u64,

    /// Maximum pooled PostgreSQL connections per profile
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "QUERYDECK_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS, env = "QUERYDECK_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: u64,

    /// Seconds before an idle pooled connection is closed
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS, env = "QUERYDECK_IDLE_TIMEOUT")]
    pub idle_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUERYDECK_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "QUERYDECK_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            settings: None,
            databases: Vec::new(),
            active: None,
            auto_commit: AutoCommitPolicy::Auto,
            default_limit: DEFAULT_ROW_LIMIT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Parse all `--database` entries into profiles.
    pub fn parse_profiles(&self) -> Result<Vec<ConnectionProfile>, ProfileError> {
        self.databases
            .iter()
            .map(|s| ConnectionProfile::from_url(s))
            .collect()
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: Some(self.max_connections),
            acquire_timeout_secs: Some(self.acquire_timeout),
            idle_timeout_secs: Some(self.idle_timeout),
        }
    }

    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        self.pool_options().validate()?;
        if self.settings.is_none() && self.databases.is_empty() {
            return Err(
                "No connections configured. Pass --settings <file> or at least one --database <url>."
                    .to_string(),
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auto_commit, AutoCommitPolicy::Auto);
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.pool_options().max_connections_or_default(), 5);
    }

    #[test]
    fn test_pool_option_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.max_connections_or_default(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(options.acquire_timeout_or_default(), 30);
        assert_eq!(options.idle_timeout_or_default(), 600);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_pool_option_validation() {
        let options = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(options.validate().unwrap_err().contains("max_connections"));
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::try_parse_from([
            "querydeck",
            "-d",
            "app=postgres://u:p@localhost:5432/app",
            "--database",
            "sqlite:/tmp/local.db",
            "--auto-commit",
            "smart",
            "--default-limit",
            "0",
        ])
        .unwrap();

        assert_eq!(config.auto_commit, AutoCommitPolicy::Smart);
        assert_eq!(config.default_limit, 0);

        let profiles = config.parse_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, "app");
        assert_eq!(profiles[0].db_type, DatabaseType::Postgres);
        assert_eq!(profiles[1].id, "local");
        assert_eq!(profiles[1].db_type, DatabaseType::Sqlite);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result = Config::try_parse_from(["querydeck", "--auto-commit", "sometimes"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_a_source() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = Config {
            databases: vec!["sqlite::memory:".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
