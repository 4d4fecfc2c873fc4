//! Transaction coordinator.
//!
//! Per-connection state machine `Idle <-> InTransaction`, plus the
//! auto-commit policy the executor consults before each statement.
//!
//! Operations on an id take that connection's lock for their duration and
//! never touch any other connection.

use crate::db::adapter::{self, TxEnd};
use crate::db::registry::{ConnectionRegistry, ConnectionState, SharedState};
use crate::db::statement;
use crate::error::{DbError, DbResult};
use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// When the executor opens a transaction implicitly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AutoCommitPolicy {
    /// Never open one; the backend commits each statement.
    #[default]
    Auto,
    /// Open one before the first statement; everything accumulates until
    /// an explicit commit or rollback.
    Off,
    /// Open one only before a non-SELECT statement.
    Smart,
}

impl AutoCommitPolicy {
    /// Whether a transaction must be opened before running `sql`.
    pub fn should_begin(self, in_transaction: bool, sql: &str) -> bool {
        if in_transaction {
            return false;
        }
        match self {
            Self::Auto => false,
            Self::Off => true,
            Self::Smart => !statement::is_select_like(sql),
        }
    }
}

impl std::fmt::Display for AutoCommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Off => write!(f, "off"),
            Self::Smart => write!(f, "smart"),
        }
    }
}

/// Drives begin/commit/rollback against the registry's connections.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    registry: ConnectionRegistry,
}

impl TransactionCoordinator {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    async fn live_state(&self, connection_id: &str) -> DbResult<SharedState> {
        self.registry
            .get_state(connection_id)
            .await
            .ok_or_else(|| DbError::connection_not_live(connection_id))
    }

    /// Begin a transaction. Returns false (no-op) if one is already open.
    pub async fn begin_transaction(&self, connection_id: &str) -> DbResult<bool> {
        let shared = self.live_state(connection_id).await?;
        let mut state = shared.lock().await;
        self.begin_locked(&mut state).await
    }

    /// Commit. Returns false (no-op) if no transaction is open.
    pub async fn commit_transaction(&self, connection_id: &str) -> DbResult<bool> {
        let shared = self.live_state(connection_id).await?;
        let mut state = shared.lock().await;
        self.end_locked(&mut state, TxEnd::Commit).await
    }

    /// Roll back. Returns false (no-op) if no transaction is open.
    pub async fn rollback_transaction(&self, connection_id: &str) -> DbResult<bool> {
        let shared = self.live_state(connection_id).await?;
        let mut state = shared.lock().await;
        self.end_locked(&mut state, TxEnd::Rollback).await
    }

    /// Begin on a state whose lock the caller already holds.
    pub(crate) async fn begin_locked(&self, state: &mut ConnectionState) -> DbResult<bool> {
        if state.in_transaction() {
            return Ok(false);
        }
        let tx = adapter::begin(state.main_mut()?).await?;
        state.mark_begun(tx);
        info!(
            connection_id = %state.connection_id(),
            db_type = %state.db_type(),
            "Transaction started"
        );
        self.registry.notify_changed();
        Ok(true)
    }

    /// Commit or roll back on a state whose lock the caller already holds.
    ///
    /// On failure the transaction flag is left as it was, so the state can
    /// be inspected rather than assumed closed.
    pub(crate) async fn end_locked(
        &self,
        state: &mut ConnectionState,
        end: TxEnd,
    ) -> DbResult<bool> {
        if !state.in_transaction() {
            return Ok(false);
        }
        let uncommitted = state.uncommitted_count();
        let tx = state.take_tx();
        let result = adapter::end_transaction(state.main_mut()?, tx, end).await;

        match result {
            Ok(()) => {
                state.mark_ended();
                match end {
                    TxEnd::Commit => info!(
                        connection_id = %state.connection_id(),
                        uncommitted,
                        "Transaction committed"
                    ),
                    TxEnd::Rollback => info!(
                        connection_id = %state.connection_id(),
                        uncommitted,
                        "Transaction rolled back"
                    ),
                }
                self.registry.notify_changed();
                Ok(true)
            }
            Err(e) => {
                warn!(
                    connection_id = %state.connection_id(),
                    error = %e,
                    "Transaction end failed; state left open"
                );
                Err(e)
            }
        }
    }
}
