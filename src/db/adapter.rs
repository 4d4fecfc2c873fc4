//! Backend driver adapters.
//!
//! One closed set of backend variants behind a uniform capability set:
//! connect, test-connect, execute, begin, commit/rollback and close.
//!
//! # Handles
//!
//! - PostgreSQL keeps a pool. Ordinary statements borrow a connection for
//!   their duration; a transaction checks one out and keeps it until
//!   COMMIT/ROLLBACK.
//! - MySQL and SQLite keep a single persistent connection, which also
//!   carries any transaction.
//!
//! # Statements
//!
//! Statements are sent as raw SQL without bind arguments, so several
//! statements may be submitted at once. Only the last statement's outcome is
//! reported.

use crate::config::PoolOptions;
use crate::db::statement;
use crate::db::types::{self, RowToJson};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, ConnectionProfile, DatabaseType, QueryResult};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Database, Either, Executor, PgPool, Postgres};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A checked-out PostgreSQL connection dedicated to one transaction.
pub type PgTxHandle = PoolConnection<Postgres>;

/// The long-lived handle for one connection.
pub enum BackendHandle {
    Postgres(PgPool),
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

impl BackendHandle {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::Postgres(_) => DatabaseType::Postgres,
            Self::MySql(_) => DatabaseType::MySql,
            Self::Sqlite(_) => DatabaseType::Sqlite,
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres(pool) => f
                .debug_struct("Postgres")
                .field("size", &pool.size())
                .field("idle", &pool.num_idle())
                .finish(),
            Self::MySql(_) => f.write_str("MySql"),
            Self::Sqlite(_) => f.write_str("Sqlite"),
        }
    }
}

/// The handle a statement should run on right now.
pub enum ActiveHandle<'a> {
    /// No transaction: borrow a pooled connection for this statement only.
    PgPool(&'a PgPool),
    /// Inside a transaction: the checked-out connection.
    PgTx(&'a mut PgConnection),
    MySql(&'a mut MySqlConnection),
    Sqlite(&'a mut SqliteConnection),
}

/// Raw outcome of one execution, before it is reported.
#[derive(Debug, Clone)]
pub enum RawResult {
    /// Row-returning statement (possibly zero rows or zero columns).
    Tabular(QueryResult),
    /// DML/DDL: verb plus affected-row count.
    Command {
        verb: String,
        rows_affected: u64,
        execution_time_ms: u64,
    },
}

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEnd {
    Commit,
    Rollback,
}

impl TxEnd {
    fn sql(self) -> &'static str {
        match self {
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

// =============================================================================
// Connect / close
// =============================================================================

fn pg_options(profile: &ConnectionProfile) -> PgConnectOptions {
    let mut options = PgConnectOptions::new().database(&profile.database);
    if let Some(host) = &profile.host {
        options = options.host(host);
    }
    if let Some(port) = profile.port {
        options = options.port(port);
    }
    if let Some(user) = &profile.user {
        options = options.username(user);
    }
    if let Some(password) = &profile.password {
        options = options.password(password);
    }
    options
}

fn mysql_options(profile: &ConnectionProfile) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .database(&profile.database)
        .charset("utf8mb4");
    if let Some(host) = &profile.host {
        options = options.host(host);
    }
    if let Some(port) = profile.port {
        options = options.port(port);
    }
    if let Some(user) = &profile.user {
        options = options.username(user);
    }
    if let Some(password) = &profile.password {
        options = options.password(password);
    }
    options
}

fn sqlite_options(profile: &ConnectionProfile) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&profile.database)
        .create_if_missing(true)
}

fn connect_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    let suggestion = connection_suggestion(db_type, &error);
    DbError::connect(
        format!("Failed to connect to {}: {}", db_type, error),
        suggestion,
    )
}

/// Open the long-lived handle for a profile.
///
/// Never retries; the caller decides what to do with a failure.
pub async fn connect(profile: &ConnectionProfile, pool: &PoolOptions) -> DbResult<BackendHandle> {
    let db_type = profile.db_type;
    let handle = match db_type {
        DatabaseType::Postgres => {
            let pg = PgPoolOptions::new()
                .max_connections(pool.max_connections_or_default())
                .acquire_timeout(Duration::from_secs(pool.acquire_timeout_or_default()))
                .idle_timeout(Some(Duration::from_secs(pool.idle_timeout_or_default())))
                .test_before_acquire(true)
                .connect_with(pg_options(profile))
                .await
                .map_err(|e| connect_error(db_type, e))?;
            BackendHandle::Postgres(pg)
        }
        DatabaseType::MySql => {
            let conn = MySqlConnection::connect_with(&mysql_options(profile))
                .await
                .map_err(|e| connect_error(db_type, e))?;
            BackendHandle::MySql(conn)
        }
        DatabaseType::Sqlite => {
            let conn = SqliteConnection::connect_with(&sqlite_options(profile))
                .await
                .map_err(|e| connect_error(db_type, e))?;
            BackendHandle::Sqlite(conn)
        }
    };
    Ok(handle)
}

/// Open and immediately close a throwaway connection.
pub async fn test_connect(profile: &ConnectionProfile) -> DbResult<()> {
    let db_type = profile.db_type;
    let closed = match db_type {
        DatabaseType::Postgres => PgConnection::connect_with(&pg_options(profile))
            .await
            .map_err(|e| connect_error(db_type, e))?
            .close()
            .await,
        DatabaseType::MySql => MySqlConnection::connect_with(&mysql_options(profile))
            .await
            .map_err(|e| connect_error(db_type, e))?
            .close()
            .await,
        DatabaseType::Sqlite => SqliteConnection::connect_with(&sqlite_options(profile))
            .await
            .map_err(|e| connect_error(db_type, e))?
            .close()
            .await,
    };
    if let Err(e) = closed {
        warn!(connection_id = %profile.id, error = %e, "Failed to close test connection");
    }
    Ok(())
}

/// Close a handle, releasing any transaction connection first.
///
/// A pool waits for checked-out connections on close, so the transaction
/// connection must go before the pool.
pub async fn close(handle: BackendHandle, tx: Option<PgTxHandle>) -> DbResult<()> {
    if let Some(conn) = tx {
        conn.close()
            .await
            .map_err(|e| DbError::internal(format!("Failed to release transaction connection: {}", e)))?;
    }
    match handle {
        BackendHandle::Postgres(pool) => {
            pool.close().await;
            Ok(())
        }
        BackendHandle::MySql(conn) => conn
            .close()
            .await
            .map_err(|e| DbError::internal(format!("Failed to close MySQL connection: {}", e))),
        BackendHandle::Sqlite(conn) => conn
            .close()
            .await
            .map_err(|e| DbError::internal(format!("Failed to close SQLite database: {}", e))),
    }
}

/// Query the server version; failures are logged and ignored.
pub async fn server_version(handle: &mut BackendHandle) -> Option<String> {
    let result = match handle {
        BackendHandle::Postgres(pool) => {
            sqlx::query_scalar::<_, String>("SELECT version()")
                .fetch_one(&*pool)
                .await
        }
        BackendHandle::MySql(conn) => {
            sqlx::query_scalar::<_, String>("SELECT version()")
                .fetch_one(conn)
                .await
        }
        BackendHandle::Sqlite(conn) => {
            sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                .fetch_one(conn)
                .await
        }
    };
    match result {
        Ok(version) => {
            debug!(version = %version, "Got server version");
            Some(version)
        }
        Err(e) => {
            warn!(error = %e, "Failed to get server version");
            None
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", db_type);
    }
    if error_str.contains("authentication")
        || error_str.contains("password")
        || error_str.contains("access denied")
    {
        return "Verify the user name and password in the connection profile".to_string();
    }
    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }
    if error_str.contains("unable to open") || error_str.contains("permission denied") {
        return "Check that the database file's directory exists and is writable".to_string();
    }

    match db_type {
        DatabaseType::Postgres | DatabaseType::MySql => {
            "Check the host, port and database in the connection profile".to_string()
        }
        DatabaseType::Sqlite => "Check the database file path in the connection profile".to_string(),
    }
}

// =============================================================================
// Execute
// =============================================================================

/// Rows and completion of the last statement in a batch.
struct LastStatement<DB: Database> {
    rows: Vec<DB::Row>,
    done: Option<DB::QueryResult>,
}

/// Run `sql` and keep only the last statement's rows and completion.
async fn fetch_last<'c, DB, E>(executor: E, sql: &'c str) -> Result<LastStatement<DB>, sqlx::Error>
where
    DB: Database,
    E: Executor<'c, Database = DB>,
{
    let mut stream = sqlx::raw_sql(sql).fetch_many(executor);
    let mut current = Vec::new();
    let mut last = LastStatement {
        rows: Vec::new(),
        done: None,
    };
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => {
                last = LastStatement {
                    rows: std::mem::take(&mut current),
                    done: Some(done),
                };
            }
            Either::Right(row) => current.push(row),
        }
    }
    if !current.is_empty() {
        last = LastStatement {
            rows: current,
            done: None,
        };
    }
    Ok(last)
}

/// How the last statement of a batch should be reported.
struct Shape {
    verb: Option<String>,
    tabular: bool,
    /// Whether the statement can be described for zero-row column metadata.
    describable: bool,
}

fn shape(sql: &str, db_type: DatabaseType, has_rows: bool) -> Shape {
    let verb = statement::last_verb(sql, db_type);
    let tabular = has_rows || verb.as_deref().is_some_and(statement::is_tabular_verb);
    let describable = !has_rows
        && db_type != DatabaseType::Sqlite
        && statement::statement_count(sql, db_type) == 1
        && verb
            .as_deref()
            .is_some_and(|v| matches!(v, "SELECT" | "WITH" | "VALUES" | "TABLE"));
    Shape {
        verb,
        tabular,
        describable,
    }
}

fn command(shape: Shape, rows_affected: u64, start: Instant) -> RawResult {
    RawResult::Command {
        verb: shape.verb.unwrap_or_else(|| "Statement".to_string()),
        rows_affected,
        execution_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn tabular<R: RowToJson>(
    rows: &[R],
    described: Option<Vec<ColumnMetadata>>,
    start: Instant,
) -> RawResult {
    let elapsed = start.elapsed().as_millis() as u64;
    RawResult::Tabular(types::normalize_rows(rows, described, elapsed))
}

/// Run a statement (or batch) on the active handle.
pub async fn execute(handle: ActiveHandle<'_>, sql: &str) -> DbResult<RawResult> {
    match handle {
        ActiveHandle::PgPool(pool) => {
            // Borrowed for this statement only; returned to the pool on drop.
            let mut conn = pool.acquire().await?;
            postgres::execute(&mut conn, sql).await
        }
        ActiveHandle::PgTx(conn) => postgres::execute(conn, sql).await,
        ActiveHandle::MySql(conn) => mysql::execute(conn, sql).await,
        ActiveHandle::Sqlite(conn) => sqlite::execute(conn, sql).await,
    }
}

mod postgres {
    use super::*;

    pub async fn execute(conn: &mut PgConnection, sql: &str) -> DbResult<RawResult> {
        let start = Instant::now();
        let last = fetch_last(&mut *conn, sql).await?;
        let shape = shape(sql, DatabaseType::Postgres, !last.rows.is_empty());

        if !shape.tabular {
            let affected = last.done.map(|d| d.rows_affected()).unwrap_or(0);
            return Ok(command(shape, affected, start));
        }

        let described = if shape.describable {
            describe(conn, sql).await
        } else {
            None
        };
        Ok(tabular(&last.rows, described, start))
    }

    async fn describe(conn: &mut PgConnection, sql: &str) -> Option<Vec<ColumnMetadata>> {
        match conn.describe(sql).await {
            Ok(d) => Some(types::pg_columns(d.columns())),
            Err(e) => {
                debug!(error = %e, "Could not describe statement");
                None
            }
        }
    }
}

mod mysql {
    use super::*;

    pub async fn execute(conn: &mut MySqlConnection, sql: &str) -> DbResult<RawResult> {
        let start = Instant::now();
        let last = fetch_last(&mut *conn, sql).await?;
        let shape = shape(sql, DatabaseType::MySql, !last.rows.is_empty());

        if !shape.tabular {
            let affected = last.done.map(|d| d.rows_affected()).unwrap_or(0);
            return Ok(command(shape, affected, start));
        }

        let described = if shape.describable {
            match conn.describe(sql).await {
                Ok(d) => Some(types::mysql_columns(d.columns())),
                Err(e) => {
                    debug!(error = %e, "Could not describe statement");
                    None
                }
            }
        } else {
            None
        };
        Ok(tabular(&last.rows, described, start))
    }
}

mod sqlite {
    use super::*;

    /// SQLite reports no column types, and no columns without rows.
    pub async fn execute(conn: &mut SqliteConnection, sql: &str) -> DbResult<RawResult> {
        let start = Instant::now();
        let last = fetch_last(&mut *conn, sql).await?;
        let shape = shape(sql, DatabaseType::Sqlite, !last.rows.is_empty());

        if !shape.tabular {
            let affected = last.done.map(|d| d.rows_affected()).unwrap_or(0);
            return Ok(command(shape, affected, start));
        }
        Ok(tabular(&last.rows, None, start))
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Issue BEGIN.
///
/// PostgreSQL checks a connection out of the pool and returns it as the
/// transaction handle. MySQL and SQLite begin on their persistent
/// connection and return `None`.
pub async fn begin(handle: &mut BackendHandle) -> DbResult<Option<PgTxHandle>> {
    match handle {
        BackendHandle::Postgres(pool) => {
            let mut conn = pool
                .acquire()
                .await
                .map_err(|e| DbError::transaction("begin", e))?;
            if let Err(e) = (&mut *conn).execute("BEGIN").await {
                let _ = conn.close().await;
                return Err(DbError::transaction("begin", e));
            }
            Ok(Some(conn))
        }
        BackendHandle::MySql(conn) => {
            conn.execute("BEGIN")
                .await
                .map_err(|e| DbError::transaction("begin", e))?;
            Ok(None)
        }
        BackendHandle::Sqlite(conn) => {
            conn.execute("BEGIN")
                .await
                .map_err(|e| DbError::transaction("begin", e))?;
            Ok(None)
        }
    }
}

/// Issue COMMIT or ROLLBACK.
///
/// The PostgreSQL transaction handle is consumed: returned to the pool on
/// success, closed when the statement itself fails. Either way it is
/// released exactly once.
pub async fn end_transaction(
    handle: &mut BackendHandle,
    tx: Option<PgTxHandle>,
    end: TxEnd,
) -> DbResult<()> {
    match handle {
        BackendHandle::Postgres(_) => {
            let Some(mut conn) = tx else {
                return match end {
                    // The server already discarded the work with the connection.
                    TxEnd::Rollback => Ok(()),
                    TxEnd::Commit => Err(DbError::transaction(
                        "commit",
                        "transaction connection was lost; roll back to reset",
                    )),
                };
            };
            match (&mut *conn).execute(end.sql()).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    let _ = conn.close().await;
                    Err(DbError::transaction(end.operation(), e))
                }
            }
        }
        BackendHandle::MySql(conn) => conn
            .execute(end.sql())
            .await
            .map(|_| ())
            .map_err(|e| DbError::transaction(end.operation(), e)),
        BackendHandle::Sqlite(conn) => match conn.execute(end.sql()).await {
            Ok(_) => Ok(()),
            // The backend already ended it, e.g. `INSERT OR ROLLBACK` on a
            // conflict or a batch ending in COMMIT.
            Err(e) if end == TxEnd::Rollback && no_active_transaction(&e) => {
                debug!(error = %e, "SQLite had no open transaction; treating as rolled back");
                Ok(())
            }
            Err(e) => Err(DbError::transaction(end.operation(), e)),
        },
    }
}

/// SQLite's answer to COMMIT or ROLLBACK outside a transaction.
fn no_active_transaction(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.message().contains("no transaction is active"))
}
