//! Connection registry.
//!
//! Maps a connection id to its live `ConnectionState`. The registry is an
//! explicitly constructed value (cheap to clone, shared state inside), so
//! each test can use a fresh one.
//!
//! Each state sits behind its own async mutex. Holding that lock for the
//! whole of a statement or transaction operation serializes work on one
//! connection while leaving other connections independent.

use crate::config::PoolOptions;
use crate::db::adapter::{self, ActiveHandle, BackendHandle, PgTxHandle, TxEnd};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, DatabaseType};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

/// Live state of one connection.
///
/// `tx` is present exactly when the backend is PostgreSQL and a
/// transaction is open. Transaction fields change only through the
/// coordinator; the statement counter only through the executor.
pub struct ConnectionState {
    connection_id: String,
    db_type: DatabaseType,
    /// Taken on disconnect.
    main: Option<BackendHandle>,
    tx: Option<PgTxHandle>,
    in_transaction: bool,
    uncommitted_count: u64,
    server_version: Option<String>,
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connection_id", &self.connection_id)
            .field("db_type", &self.db_type)
            .field("main", &self.main)
            .field("has_tx_handle", &self.tx.is_some())
            .field("in_transaction", &self.in_transaction)
            .field("uncommitted_count", &self.uncommitted_count)
            .finish()
    }
}

/// Shared handle to a connection's state.
pub type SharedState = Arc<Mutex<ConnectionState>>;

impl ConnectionState {
    fn new(connection_id: String, main: BackendHandle, server_version: Option<String>) -> Self {
        Self {
            connection_id,
            db_type: main.db_type(),
            main: Some(main),
            tx: None,
            in_transaction: false,
            uncommitted_count: 0,
            server_version,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn uncommitted_count(&self) -> u64 {
        self.uncommitted_count
    }

    pub fn has_tx_handle(&self) -> bool {
        self.tx.is_some()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// False once the connection has been torn down.
    pub fn is_live(&self) -> bool {
        self.main.is_some()
    }

    /// The handle the next statement runs on.
    ///
    /// Inside a transaction this is the transaction connection (PostgreSQL)
    /// or the persistent connection; a fresh pooled connection is only
    /// borrowed outside a transaction.
    pub fn active_handle(&mut self) -> DbResult<ActiveHandle<'_>> {
        let Some(main) = self.main.as_mut() else {
            return Err(DbError::connection_not_live(&self.connection_id));
        };
        match main {
            BackendHandle::Postgres(pool) => match (self.in_transaction, self.tx.as_mut()) {
                (false, _) => Ok(ActiveHandle::PgPool(pool)),
                (true, Some(conn)) => Ok(ActiveHandle::PgTx(&mut **conn)),
                (true, None) => Err(DbError::transaction(
                    "use",
                    "transaction connection was lost; roll back to reset",
                )),
            },
            BackendHandle::MySql(conn) => Ok(ActiveHandle::MySql(conn)),
            BackendHandle::Sqlite(conn) => Ok(ActiveHandle::Sqlite(conn)),
        }
    }

    pub(crate) fn main_mut(&mut self) -> DbResult<&mut BackendHandle> {
        match self.main.as_mut() {
            Some(main) => Ok(main),
            None => Err(DbError::connection_not_live(&self.connection_id)),
        }
    }

    pub(crate) fn take_tx(&mut self) -> Option<PgTxHandle> {
        self.tx.take()
    }

    /// Enter the transaction state with the handle `begin` returned.
    pub(crate) fn mark_begun(&mut self, tx: Option<PgTxHandle>) {
        self.tx = tx;
        self.in_transaction = true;
        self.uncommitted_count = 0;
    }

    /// Leave the transaction state.
    pub(crate) fn mark_ended(&mut self) {
        self.tx = None;
        self.in_transaction = false;
        self.uncommitted_count = 0;
    }

    pub(crate) fn record_statement(&mut self) {
        if self.in_transaction {
            self.uncommitted_count += 1;
        }
    }
}

/// What happened during a disconnect.
///
/// Disconnect always removes the entry; cleanup failures are reported here
/// as warnings instead of errors.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct DisconnectReport {
    pub connection_id: String,
    pub was_connected: bool,
    /// An open transaction was rolled back first.
    pub rolled_back: bool,
    pub warnings: Vec<String>,
}

/// Registry of live connections.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<String, SharedState>>>,
    pool_options: PoolOptions,
    changes: Arc<watch::Sender<u64>>,
}

impl ConnectionRegistry {
    pub fn new(pool_options: PoolOptions) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            pool_options,
            changes: Arc::new(changes),
        }
    }

    /// Connect, or return the existing state for this id unchanged.
    ///
    /// An existing connection is not re-validated. On failure nothing is
    /// stored.
    pub async fn connect(&self, profile: &ConnectionProfile) -> DbResult<SharedState> {
        let connection_id = profile.id.clone();

        if let Some(existing) = self.get_state(&connection_id).await {
            debug!(connection_id = %connection_id, "Already connected");
            return Ok(existing);
        }

        info!(
            connection_id = %connection_id,
            db_type = %profile.db_type,
            target = %profile.describe(),
            "Connecting to database"
        );

        let mut handle = adapter::connect(profile, &self.pool_options).await?;
        let server_version = adapter::server_version(&mut handle).await;

        // Re-check after async work; a concurrent connect may have won.
        let (state, duplicate) = {
            let mut entries = self.entries.write().await;
            match entries.get(&connection_id) {
                Some(existing) => (Arc::clone(existing), Some(handle)),
                None => {
                    let state = Arc::new(Mutex::new(ConnectionState::new(
                        connection_id.clone(),
                        handle,
                        server_version.clone(),
                    )));
                    entries.insert(connection_id.clone(), Arc::clone(&state));
                    (state, None)
                }
            }
        }; // Lock released here

        match duplicate {
            Some(handle) => {
                // Close the handle we just opened outside of the lock
                if let Err(e) = adapter::close(handle, None).await {
                    warn!(connection_id = %connection_id, error = %e, "Failed to close duplicate connection");
                }
            }
            None => {
                info!(
                    connection_id = %connection_id,
                    server_version = ?server_version,
                    "Connected successfully"
                );
                self.notify_changed();
            }
        }
        Ok(state)
    }

    /// Tear down a connection. No-op if it is not connected.
    ///
    /// An open transaction is rolled back explicitly before the handle is
    /// closed. The entry is removed even when cleanup fails.
    pub async fn disconnect(&self, connection_id: &str) -> DisconnectReport {
        let mut report = DisconnectReport {
            connection_id: connection_id.to_string(),
            ..Default::default()
        };

        let Some(shared) = self.entries.write().await.remove(connection_id) else {
            return report;
        };
        report.was_connected = true;

        let mut state = shared.lock().await;
        if state.in_transaction {
            let tx = state.take_tx();
            match state.main.as_mut() {
                Some(main) => match adapter::end_transaction(main, tx, TxEnd::Rollback).await {
                    Ok(()) => report.rolled_back = true,
                    Err(e) => report.warnings.push(e.to_string()),
                },
                None => report.warnings.push("connection already closed".to_string()),
            }
            state.mark_ended();
        }

        let tx = state.take_tx();
        if let Some(main) = state.main.take() {
            if let Err(e) = adapter::close(main, tx).await {
                report.warnings.push(e.to_string());
            }
        }
        drop(state);

        for warning in &report.warnings {
            warn!(connection_id = %connection_id, warning = %warning, "Disconnect cleanup failed");
        }
        info!(
            connection_id = %connection_id,
            rolled_back = report.rolled_back,
            "Disconnected"
        );
        self.notify_changed();
        report
    }

    /// Disconnect every connection; one failure does not stop the rest.
    pub async fn disconnect_all(&self) -> Vec<DisconnectReport> {
        let ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.disconnect(&id).await);
        }
        reports
    }

    pub async fn get_state(&self, connection_id: &str) -> Option<SharedState> {
        self.entries.read().await.get(connection_id).cloned()
    }

    pub async fn is_connected(&self, connection_id: &str) -> bool {
        self.entries.read().await.contains_key(connection_id)
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Change notifications: the value is a generation counter bumped on
    /// every connect, disconnect, transaction change and counted statement.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub(crate) fn notify_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sqlite_profile(id: &str) -> ConnectionProfile {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        ConnectionProfile::sqlite(id, path.to_string_lossy())
    }

    #[tokio::test]
    async fn test_unknown_id_has_no_state() {
        let registry = ConnectionRegistry::default();
        assert!(registry.get_state("nope").await.is_none());
        assert!(!registry.is_connected("nope").await);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let profile = sqlite_profile("local");

        let first = registry.connect(&profile).await.unwrap();
        let second = registry.connect(&profile).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connected_ids().await, vec!["local".to_string()]);

        let state = first.lock().await;
        assert_eq!(state.db_type(), DatabaseType::Sqlite);
        assert!(!state.in_transaction());
        assert_eq!(state.uncommitted_count(), 0);
        assert!(state.server_version().is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_stores_nothing() {
        let registry = ConnectionRegistry::default();
        let profile = ConnectionProfile::sqlite("bad", "/nonexistent-dir/sub/x.db");
        assert!(registry.connect(&profile).await.is_err());
        assert!(registry.get_state("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_removes_entry() {
        let registry = ConnectionRegistry::default();
        let state = registry.connect(&sqlite_profile("local")).await.unwrap();

        let report = registry.disconnect("local").await;
        assert!(report.was_connected);
        assert!(report.warnings.is_empty());
        assert!(registry.get_state("local").await.is_none());
        // A stale clone of the state can no longer run anything
        assert!(!state.lock().await.is_live());

        let report = registry.disconnect("local").await;
        assert!(!report.was_connected);
    }

    #[tokio::test]
    async fn test_disconnect_rolls_back_open_transaction() {
        let registry = ConnectionRegistry::default();
        let shared = registry.connect(&sqlite_profile("local")).await.unwrap();
        {
            let mut state = shared.lock().await;
            let tx = adapter::begin(state.main_mut().unwrap()).await.unwrap();
            state.mark_begun(tx);
        }
        let report = registry.disconnect("local").await;
        assert!(report.rolled_back);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let registry = ConnectionRegistry::default();
        registry.connect(&sqlite_profile("a")).await.unwrap();
        registry.connect(&sqlite_profile("b")).await.unwrap();

        let reports = registry.disconnect_all().await;
        assert_eq!(reports.len(), 2);
        assert!(registry.connected_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let registry = ConnectionRegistry::default();
        let rx = registry.subscribe();
        let before = *rx.borrow();

        registry.connect(&sqlite_profile("a")).await.unwrap();
        registry.disconnect("a").await;
        assert_eq!(*rx.borrow(), before + 2);
    }

    #[tokio::test]
    async fn test_record_statement_counts_only_in_transaction() {
        let registry = ConnectionRegistry::default();
        let shared = registry.connect(&sqlite_profile("a")).await.unwrap();
        let mut state = shared.lock().await;
        state.record_statement();
        assert_eq!(state.uncommitted_count(), 0);
        state.mark_begun(None);
        state.record_statement();
        state.record_statement();
        assert_eq!(state.uncommitted_count(), 2);
        state.mark_ended();
        assert_eq!(state.uncommitted_count(), 0);
        assert!(!state.in_transaction());
    }
}
