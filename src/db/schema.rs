//! Schema and table browsing.
//!
//! Read-only introspection against a live connection. Queries go through the
//! connection's active handle exactly like a normal statement: a pooled
//! PostgreSQL connection is borrowed and returned per call, and an open
//! transaction sees its own uncommitted tables.
//!
//! # Architecture
//!
//! SQL text lives in the `queries` submodule; each backend submodule exposes
//! the same two functions over its native connection type.

use crate::db::adapter::ActiveHandle;
use crate::db::registry::{ConnectionRegistry, SharedState};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SchemaTables};
use tracing::debug;

/// Lists schemas and tables of registered connections.
#[derive(Debug, Clone)]
pub struct SchemaBrowser {
    registry: ConnectionRegistry,
}

impl SchemaBrowser {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    async fn live_state(&self, connection_id: &str) -> DbResult<SharedState> {
        self.registry
            .get_state(connection_id)
            .await
            .ok_or_else(|| DbError::connection_not_live(connection_id))
    }

    /// Schema names of a connection.
    ///
    /// Empty for SQLite. MySQL reports the current database, if one is
    /// selected.
    pub async fn list_schemas(&self, connection_id: &str) -> DbResult<Vec<String>> {
        let shared = self.live_state(connection_id).await?;
        let mut state = shared.lock().await;

        let schemas = match state.active_handle()? {
            ActiveHandle::PgPool(pool) => {
                let mut conn = pool.acquire().await?;
                postgres::list_schemas(&mut conn).await?
            }
            ActiveHandle::PgTx(conn) => postgres::list_schemas(conn).await?,
            ActiveHandle::MySql(conn) => mysql::current_database(conn).await?.into_iter().collect(),
            ActiveHandle::Sqlite(_) => Vec::new(),
        };

        debug!(connection_id = %connection_id, count = schemas.len(), "Listed schemas");
        Ok(schemas)
    }

    /// Base tables of a connection, grouped by schema.
    ///
    /// `schema` narrows PostgreSQL to one schema. On MySQL it must name the
    /// current database; SQLite rejects it.
    pub async fn list_tables(
        &self,
        connection_id: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<SchemaTables>> {
        let shared = self.live_state(connection_id).await?;
        let mut state = shared.lock().await;
        if schema.is_some() && state.db_type() == DatabaseType::Sqlite {
            return Err(DbError::invalid_input(
                "SQLite has no schemas; omit the schema filter",
            ));
        }

        let groups = match state.active_handle()? {
            ActiveHandle::PgPool(pool) => {
                let mut conn = pool.acquire().await?;
                postgres::list_tables(&mut conn, schema).await?
            }
            ActiveHandle::PgTx(conn) => postgres::list_tables(conn, schema).await?,
            ActiveHandle::MySql(conn) => vec![mysql::list_tables(conn, schema).await?],
            ActiveHandle::Sqlite(conn) => vec![sqlite::list_tables(conn).await?],
        };

        debug!(
            connection_id = %connection_id,
            groups = groups.len(),
            tables = groups.iter().map(|g| g.tables.len()).sum::<usize>(),
            "Listed tables"
        );
        Ok(groups)
    }
}

mod queries {
    pub mod postgres {
        pub const LIST_SCHEMAS: &str = r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
            AND schema_name NOT LIKE 'pg_toast%'
            ORDER BY schema_name
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#;
    }

    pub mod mysql {
        pub const CURRENT_DATABASE: &str = "SELECT DATABASE()";
        pub const SHOW_TABLES: &str = "SHOW TABLES";
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;

    pub async fn list_schemas(conn: &mut PgConnection) -> DbResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(queries::postgres::LIST_SCHEMAS)
            .fetch_all(&mut *conn)
            .await?;
        Ok(names)
    }

    pub async fn list_tables(
        conn: &mut PgConnection,
        schema: Option<&str>,
    ) -> DbResult<Vec<SchemaTables>> {
        let schemas = match schema {
            Some(name) => vec![name.to_string()],
            None => list_schemas(conn).await?,
        };

        let mut groups = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let tables = sqlx::query_scalar::<_, String>(queries::postgres::LIST_TABLES)
                .bind(&schema)
                .fetch_all(&mut *conn)
                .await?;
            groups.push(SchemaTables::new(Some(schema), tables));
        }
        Ok(groups)
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    /// MySQL may hand back identifiers as VARBINARY depending on collation.
    fn string_at<I>(row: &MySqlRow, index: I) -> Option<String>
    where
        I: sqlx::ColumnIndex<MySqlRow> + Copy,
    {
        row.try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(index)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn current_database(conn: &mut MySqlConnection) -> DbResult<Option<String>> {
        let row = sqlx::query(queries::mysql::CURRENT_DATABASE)
            .fetch_one(&mut *conn)
            .await?;
        Ok(string_at(&row, 0))
    }

    pub async fn list_tables(
        conn: &mut MySqlConnection,
        schema: Option<&str>,
    ) -> DbResult<SchemaTables> {
        let database = current_database(conn).await?;
        if let Some(requested) = schema {
            if database.as_deref() != Some(requested) {
                return Err(DbError::invalid_input(format!(
                    "MySQL connection is bound to {}; cannot list tables of '{requested}'",
                    database.as_deref().unwrap_or("no database"),
                )));
            }
        }

        let rows = sqlx::query(queries::mysql::SHOW_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        // The single column is named Tables_in_<database>
        let key = database.as_ref().map(|db| format!("Tables_in_{db}"));
        let tables = rows
            .iter()
            .filter_map(|row| {
                key.as_deref()
                    .and_then(|k| string_at(row, k))
                    .or_else(|| string_at(row, 0))
            })
            .collect();

        Ok(SchemaTables::new(database, tables))
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqliteConnection;

    pub async fn list_tables(conn: &mut SqliteConnection) -> DbResult<SchemaTables> {
        let tables = sqlx::query_scalar::<_, String>(queries::sqlite::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;
        Ok(SchemaTables::new(None, tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::QueryExecutor;
    use crate::db::transaction::{AutoCommitPolicy, TransactionCoordinator};
    use crate::models::ConnectionProfile;
    use tempfile::NamedTempFile;

    async fn setup() -> (QueryExecutor, SchemaBrowser) {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let registry = ConnectionRegistry::default();
        registry
            .connect(&ConnectionProfile::sqlite("db", path.to_string_lossy()))
            .await
            .unwrap();
        let coordinator = TransactionCoordinator::new(registry.clone());
        (
            QueryExecutor::new(registry.clone(), coordinator),
            SchemaBrowser::new(registry),
        )
    }

    #[tokio::test]
    async fn test_sqlite_lists_user_tables_only() {
        let (executor, browser) = setup().await;
        executor
            .run(
                "CREATE TABLE b (id INTEGER PRIMARY KEY AUTOINCREMENT); CREATE TABLE a (id INTEGER)",
                Some("db"),
                AutoCommitPolicy::Auto,
            )
            .await
            .unwrap();

        // AUTOINCREMENT creates sqlite_sequence, which is filtered out
        let groups = browser.list_tables("db", None).await.unwrap();
        assert_eq!(groups, vec![SchemaTables::new(None, vec!["a".into(), "b".into()])]);
        assert!(browser.list_schemas("db").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_rejects_schema_filter() {
        let (_executor, browser) = setup().await;
        let err = browser.list_tables("db", Some("public")).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let (_executor, browser) = setup().await;
        let err = browser.list_tables("nope", None).await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionNotLive { .. }));
    }
}
