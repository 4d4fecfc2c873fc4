//! Error types for querydeck.
//!
//! All failures are reported as a single `DbError` whose `Display` combines
//! the operation that was attempted with the underlying cause, so a front end
//! can show it to the user verbatim.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connect { message: String, suggestion: String },

    #[error("No active connection. Select a connection before running a query.")]
    NoActiveConnection,

    #[error("Connection '{connection_id}' is not connected")]
    ConnectionNotLive { connection_id: String },

    #[error("Connection profile not found: {connection_id}")]
    ProfileNotFound { connection_id: String },

    #[error("Failed to {operation} transaction: {message}")]
    Transaction { operation: String, message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("{}", rolled_back_message(.query, .rollback_error.as_deref()))]
    QueryRolledBack {
        query: Box<DbError>,
        rollback_error: Option<String>,
    },

    #[error("Export failed: {message}")]
    Export { message: String },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn rolled_back_message(query: &DbError, rollback_error: Option<&str>) -> String {
    match rollback_error {
        None => format!("{}. Transaction rolled back.", query),
        Some(e) => format!("{}. Transaction rollback also failed: {}", query, e),
    }
}

impl DbError {
    /// Create a connect error with a helpful suggestion.
    pub fn connect(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn connection_not_live(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotLive {
            connection_id: connection_id.into(),
        }
    }

    pub fn profile_not_found(connection_id: impl Into<String>) -> Self {
        Self::ProfileNotFound {
            connection_id: connection_id.into(),
        }
    }

    /// Create a transaction error for `operation` ("begin", "commit", "rollback").
    pub fn transaction(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Transaction {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    /// Wrap a statement failure that happened inside a transaction which was
    /// then rolled back (or whose rollback failed too).
    pub fn query_rolled_back(query: DbError, rollback_error: Option<DbError>) -> Self {
        Self::QueryRolledBack {
            query: Box::new(query),
            rollback_error: rollback_error.map(|e| e.to_string()),
        }
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
        }
    }

    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connect { suggestion, .. } => Some(suggestion),
            Self::NoActiveConnection => Some("Call use_connection with a connection id"),
            Self::ConnectionNotLive { .. } => Some("Call connect for this connection and retry"),
            Self::QueryRolledBack { .. } => {
                Some("All uncommitted statements were discarded; re-run them if needed")
            }
            _ => None,
        }
    }

    /// The separate user-facing events this error stands for.
    ///
    /// A failure inside a transaction surfaces two events: the statement
    /// failure and the rollback notice.
    pub fn events(&self) -> Vec<String> {
        match self {
            Self::QueryRolledBack {
                query,
                rollback_error,
            } => {
                let notice = match rollback_error {
                    None => "Transaction rolled back".to_string(),
                    Some(e) => format!("Transaction rollback failed: {}", e),
                };
                vec![query.to_string(), notice]
            }
            other => vec![other.to_string()],
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(db_err.message(), code)
            }
            sqlx::Error::Configuration(msg) => DbError::connect(
                msg.to_string(),
                "Check the connection profile settings and credentials",
            ),
            sqlx::Error::PoolTimedOut => DbError::connect(
                "Timed out acquiring a pooled connection",
                "Check that the server is reachable or raise --acquire-timeout",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connect("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connect(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connect(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::query(format!("Protocol error: {}", msg), None),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::query(other.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for semantic error categorization.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            DbError::InvalidInput { .. } | DbError::Query { .. } => {
                let msg = match &err {
                    DbError::Query {
                        message,
                        sql_state: Some(code),
                    } => format!("Query failed: {} (SQLSTATE: {})", message, code),
                    _ => err.to_string(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }
            DbError::QueryRolledBack { .. } => rmcp::ErrorData::invalid_params(
                err.to_string(),
                Some(serde_json::json!({
                    "events": err.events(),
                    "suggestion": err.suggestion(),
                })),
            ),
            DbError::NoActiveConnection
            | DbError::ConnectionNotLive { .. }
            | DbError::ProfileNotFound { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), data)
            }
            DbError::Connect { .. }
            | DbError::Transaction { .. }
            | DbError::Export { .. }
            | DbError::Settings { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}
