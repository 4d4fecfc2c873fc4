//! Workbench: the caller-facing facade over settings, registry, coordinator,
//! executor and schema browser.
//!
//! Every operation reads the settings store first, so the active connection,
//! auto-commit policy and default limit always reflect the latest settings.

use crate::config::PoolOptions;
use crate::db::adapter;
use crate::db::statement;
use crate::db::{
    ConnectionRegistry, DisconnectReport, QueryExecutor, SchemaBrowser, TransactionCoordinator,
};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, ConnectionStatus, QueryResult, RunOutcome, SchemaTables};
use crate::settings::{Settings, SettingsStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Workbench {
    settings: Arc<dyn SettingsStore>,
    registry: ConnectionRegistry,
    coordinator: TransactionCoordinator,
    executor: QueryExecutor,
    schema: SchemaBrowser,
}

impl Workbench {
    pub fn new(settings: Arc<dyn SettingsStore>, pool_options: PoolOptions) -> Self {
        let registry = ConnectionRegistry::new(pool_options);
        let coordinator = TransactionCoordinator::new(registry.clone());
        let executor = QueryExecutor::new(registry.clone(), coordinator.clone());
        let schema = SchemaBrowser::new(registry.clone());
        Self {
            settings,
            registry,
            coordinator,
            executor,
            schema,
        }
    }

    pub fn settings(&self) -> DbResult<Settings> {
        self.settings.load()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn profile(&self, connection_id: &str) -> DbResult<ConnectionProfile> {
        self.settings
            .load()?
            .profile(connection_id)
            .cloned()
            .ok_or_else(|| DbError::profile_not_found(connection_id))
    }

    /// `connection_id`, or the active connection when `None`.
    pub fn resolve(&self, connection_id: Option<&str>) -> DbResult<String> {
        match connection_id {
            Some(id) => Ok(id.to_string()),
            None => self
                .settings
                .load()?
                .active_connection
                .ok_or(DbError::NoActiveConnection),
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open a connection for a saved profile. Idempotent.
    pub async fn connect(&self, connection_id: &str) -> DbResult<()> {
        let profile = self.profile(connection_id)?;
        self.registry.connect(&profile).await?;
        Ok(())
    }

    pub async fn disconnect(&self, connection_id: &str) -> DisconnectReport {
        self.registry.disconnect(connection_id).await
    }

    /// Open and immediately close a throwaway connection; nothing is
    /// registered.
    pub async fn test_connection(&self, connection_id: &str) -> DbResult<()> {
        let profile = self.profile(connection_id)?;
        adapter::test_connect(&profile).await
    }

    /// Make `connection_id` the connection used when a query names none.
    pub fn use_connection(&self, connection_id: &str) -> DbResult<()> {
        self.settings.set_active(Some(connection_id))?;
        info!(connection_id = %connection_id, "Active connection changed");
        Ok(())
    }

    /// Delete a profile, disconnecting it first.
    pub async fn remove_profile(&self, connection_id: &str) -> DbResult<DisconnectReport> {
        // Fail before tearing anything down if the profile does not exist
        self.profile(connection_id)?;
        let report = self.registry.disconnect(connection_id).await;
        self.settings.remove_profile(connection_id)?;
        info!(connection_id = %connection_id, "Connection profile removed");
        Ok(report)
    }

    /// Profiles joined with their live state.
    pub async fn statuses(&self) -> DbResult<Vec<ConnectionStatus>> {
        let settings = self.settings.load()?;
        let mut statuses = Vec::with_capacity(settings.connections.len());
        for profile in &settings.connections {
            let (connected, in_transaction, uncommitted_count) =
                match self.registry.get_state(&profile.id).await {
                    Some(shared) => {
                        let state = shared.lock().await;
                        (state.is_live(), state.in_transaction(), state.uncommitted_count())
                    }
                    None => (false, false, 0),
                };
            statuses.push(ConnectionStatus {
                id: profile.id.clone(),
                name: profile.name.clone(),
                db_type: profile.db_type,
                connected,
                active: settings.active_connection.as_deref() == Some(profile.id.as_str()),
                in_transaction,
                uncommitted_count,
            });
        }
        Ok(statuses)
    }

    /// `(in_transaction, uncommitted_count)` of a live connection.
    pub async fn transaction_state(&self, connection_id: &str) -> Option<(bool, u64)> {
        let shared = self.registry.get_state(connection_id).await?;
        let state = shared.lock().await;
        Some((state.in_transaction(), state.uncommitted_count()))
    }

    /// Change notifications for a presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.registry.subscribe()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run `sql` on the active connection.
    pub async fn run(&self, sql: &str) -> DbResult<RunOutcome> {
        let settings = self.settings.load()?;
        let connection_id = settings.active_connection.clone();
        self.run_with(sql, connection_id.as_deref(), &settings).await
    }

    /// Run `sql` on an explicit connection.
    pub async fn run_on(&self, sql: &str, connection_id: &str) -> DbResult<RunOutcome> {
        let settings = self.settings.load()?;
        self.run_with(sql, Some(connection_id), &settings).await
    }

    async fn run_with(
        &self,
        sql: &str,
        connection_id: Option<&str>,
        settings: &Settings,
    ) -> DbResult<RunOutcome> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_input("SQL text is empty"));
        }

        let live = match connection_id {
            Some(id) => self.registry.get_state(id).await,
            None => None,
        };
        let mut sql = sql.to_string();
        if let Some(shared) = live {
            let db_type = shared.lock().await.db_type();
            sql = statement::apply_default_limit(&sql, settings.default_limit, db_type);
        }

        self.executor
            .run(&sql, connection_id, settings.auto_commit)
            .await
    }

    /// The most recent tabular result, if any.
    pub async fn last_result(&self) -> Option<Arc<QueryResult>> {
        self.executor.last_result().await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn begin(&self, connection_id: Option<&str>) -> DbResult<bool> {
        let id = self.resolve(connection_id)?;
        self.coordinator.begin_transaction(&id).await
    }

    pub async fn commit(&self, connection_id: Option<&str>) -> DbResult<bool> {
        let id = self.resolve(connection_id)?;
        self.coordinator.commit_transaction(&id).await
    }

    pub async fn rollback(&self, connection_id: Option<&str>) -> DbResult<bool> {
        let id = self.resolve(connection_id)?;
        self.coordinator.rollback_transaction(&id).await
    }

    // =========================================================================
    // Schema browsing
    // =========================================================================

    pub async fn list_schemas(&self, connection_id: Option<&str>) -> DbResult<Vec<String>> {
        let id = self.resolve(connection_id)?;
        self.schema.list_schemas(&id).await
    }

    pub async fn list_tables(
        &self,
        connection_id: Option<&str>,
        schema: Option<&str>,
    ) -> DbResult<Vec<SchemaTables>> {
        let id = self.resolve(connection_id)?;
        self.schema.list_tables(&id, schema).await
    }

    /// Disconnect everything. Called once at process exit.
    pub async fn shutdown(&self) {
        let reports = self.registry.disconnect_all().await;
        for report in reports.iter().filter(|r| !r.warnings.is_empty()) {
            warn!(
                connection_id = %report.connection_id,
                warnings = ?report.warnings,
                "Disconnect completed with warnings"
            );
        }
        info!(count = reports.len(), "All connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AutoCommitPolicy;
    use crate::settings::MemorySettings;
    use tempfile::TempDir;

    fn workbench(dir: &TempDir, policy: AutoCommitPolicy) -> Workbench {
        let settings = Settings {
            active_connection: Some("main".into()),
            auto_commit: policy,
            default_limit: 2,
            connections: vec![
                ConnectionProfile::sqlite("main", dir.path().join("main.db").to_string_lossy()),
                ConnectionProfile::sqlite("other", dir.path().join("other.db").to_string_lossy()),
            ],
        };
        Workbench::new(
            Arc::new(MemorySettings::new(settings)),
            PoolOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_connect_unknown_profile() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Auto);
        let err = wb.connect("ghost").await.unwrap_err();
        assert!(matches!(err, DbError::ProfileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_default_limit_applies_to_selects() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Auto);
        wb.connect("main").await.unwrap();
        wb.run("CREATE TABLE t (id INTEGER)").await.unwrap();
        wb.run("INSERT INTO t VALUES (1), (2), (3)").await.unwrap();

        let outcome = wb.run("SELECT * FROM t").await.unwrap();
        assert_eq!(outcome.result().unwrap().row_count(), 2);

        let outcome = wb.run("SELECT * FROM t LIMIT 3").await.unwrap();
        assert_eq!(outcome.result().unwrap().row_count(), 3);
    }

    #[tokio::test]
    async fn test_statuses_reflect_live_state() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Off);
        wb.connect("main").await.unwrap();
        wb.run("CREATE TABLE t (id INTEGER)").await.unwrap();

        let statuses = wb.statuses().await.unwrap();
        let main = statuses.iter().find(|s| s.id == "main").unwrap();
        assert!(main.connected && main.active && main.in_transaction);
        assert_eq!(main.uncommitted_count, 1);

        let other = statuses.iter().find(|s| s.id == "other").unwrap();
        assert!(!other.connected && !other.active);
    }

    #[tokio::test]
    async fn test_remove_profile_disconnects_first() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Auto);
        wb.connect("other").await.unwrap();

        let report = wb.remove_profile("other").await.unwrap();
        assert!(report.was_connected);
        assert!(!wb.registry().is_connected("other").await);
        assert!(wb.settings().unwrap().profile("other").is_none());
    }

    #[tokio::test]
    async fn test_use_connection_switches_target() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Auto);
        wb.use_connection("other").unwrap();

        // "other" is the active id but has not been connected
        let err = wb.run("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionNotLive { .. }));
    }

    #[tokio::test]
    async fn test_empty_sql_is_rejected() {
        let dir = TempDir::new().unwrap();
        let wb = workbench(&dir, AutoCommitPolicy::Auto);
        let err = wb.run("   ").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
