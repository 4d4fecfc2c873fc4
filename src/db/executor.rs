//! Query execution pipeline.
//!
//! `run` is the single entry point for ad-hoc SQL:
//!
//! 1. resolve the connection's live state,
//! 2. route lone BEGIN/COMMIT/ROLLBACK statements to the coordinator,
//! 3. apply the auto-commit policy,
//! 4. dispatch to the backend adapter and normalize the result,
//! 5. on failure inside a transaction, roll back automatically.
//!
//! The connection's lock is held across all of it, so two runs on the same
//! connection never interleave.

use crate::db::adapter::{self, RawResult, TxEnd};
use crate::db::registry::ConnectionRegistry;
use crate::db::statement;
use crate::db::transaction::{AutoCommitPolicy, TransactionCoordinator};
use crate::error::{DbError, DbResult};
use crate::models::{QueryResult, RunOutcome, TxCommand};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    registry: ConnectionRegistry,
    coordinator: TransactionCoordinator,
    /// The single retained result; replaced by every tabular run.
    last_result: Arc<RwLock<Option<Arc<QueryResult>>>>,
}

impl QueryExecutor {
    pub fn new(registry: ConnectionRegistry, coordinator: TransactionCoordinator) -> Self {
        Self {
            registry,
            coordinator,
            last_result: Arc::new(RwLock::new(None)),
        }
    }

    /// Run `sql` on `connection_id` under `policy`.
    ///
    /// `connection_id` is `None` when no connection is configured as active.
    pub async fn run(
        &self,
        sql: &str,
        connection_id: Option<&str>,
        policy: AutoCommitPolicy,
    ) -> DbResult<RunOutcome> {
        let connection_id = connection_id.ok_or(DbError::NoActiveConnection)?;
        let shared = self
            .registry
            .get_state(connection_id)
            .await
            .ok_or_else(|| DbError::connection_not_live(connection_id))?;
        let mut state = shared.lock().await;
        if !state.is_live() {
            return Err(DbError::connection_not_live(connection_id));
        }

        if let Some(command) = statement::transaction_control(sql, state.db_type()) {
            let changed = match command {
                TxCommand::Begin => self.coordinator.begin_locked(&mut state).await?,
                TxCommand::Commit => {
                    self.coordinator
                        .end_locked(&mut state, TxEnd::Commit)
                        .await?
                }
                TxCommand::Rollback => {
                    self.coordinator
                        .end_locked(&mut state, TxEnd::Rollback)
                        .await?
                }
            };
            return Ok(RunOutcome::Transaction { command, changed });
        }

        if policy.should_begin(state.in_transaction(), sql) {
            debug!(connection_id = %connection_id, policy = %policy, "Opening implicit transaction");
            self.coordinator.begin_locked(&mut state).await?;
        }

        debug!(
            connection_id = %connection_id,
            in_transaction = state.in_transaction(),
            sql = %sql,
            "Executing statement"
        );
        let executed = match state.active_handle() {
            Ok(handle) => adapter::execute(handle, sql).await,
            Err(e) => Err(e),
        };

        let raw = match executed {
            Ok(raw) => raw,
            // Covers a transaction the policy opened just above for this
            // statement too. Leaving it open would strand an empty
            // transaction the user never asked for.
            Err(query_err) if state.in_transaction() => {
                warn!(
                    connection_id = %connection_id,
                    uncommitted = state.uncommitted_count(),
                    error = %query_err,
                    "Statement failed inside transaction; rolling back"
                );
                let rollback = self
                    .coordinator
                    .end_locked(&mut state, TxEnd::Rollback)
                    .await;
                return Err(DbError::query_rolled_back(query_err, rollback.err()));
            }
            Err(query_err) => return Err(query_err),
        };

        if state.in_transaction() {
            state.record_statement();
            self.registry.notify_changed();
        }
        drop(state);

        match raw {
            RawResult::Tabular(result) => {
                let result = Arc::new(result);
                *self.last_result.write().await = Some(Arc::clone(&result));
                Ok(RunOutcome::Rows(result))
            }
            RawResult::Command {
                verb,
                rows_affected,
                execution_time_ms,
            } => Ok(RunOutcome::Command {
                verb,
                rows_affected,
                execution_time_ms,
            }),
        }
    }

    /// The most recent tabular result, if any.
    pub async fn last_result(&self) -> Option<Arc<QueryResult>> {
        self.last_result.read().await.clone()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionProfile;
    use tempfile::NamedTempFile;

    async fn setup() -> QueryExecutor {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let registry = ConnectionRegistry::default();
        registry
            .connect(&ConnectionProfile::sqlite("db", path.to_string_lossy()))
            .await
            .unwrap();
        let coordinator = TransactionCoordinator::new(registry.clone());
        QueryExecutor::new(registry, coordinator)
    }

    async fn tx_state(executor: &QueryExecutor) -> (bool, u64) {
        let shared = executor.registry().get_state("db").await.unwrap();
        let state = shared.lock().await;
        (state.in_transaction(), state.uncommitted_count())
    }

    #[tokio::test]
    async fn test_no_active_connection() {
        let executor = setup().await;
        let err = executor
            .run("SELECT 1", None, AutoCommitPolicy::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoActiveConnection));
    }

    #[tokio::test]
    async fn test_connection_not_live() {
        let executor = setup().await;
        let err = executor
            .run("SELECT 1", Some("elsewhere"), AutoCommitPolicy::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConnectionNotLive { .. }));
    }

    #[tokio::test]
    async fn test_dml_is_not_retained() {
        let executor = setup().await;
        let auto = AutoCommitPolicy::Auto;
        executor
            .run("CREATE TABLE t (id INTEGER)", Some("db"), auto)
            .await
            .unwrap();
        let outcome = executor
            .run("INSERT INTO t VALUES (1)", Some("db"), auto)
            .await
            .unwrap();
        assert_eq!(
            outcome.message(),
            "INSERT executed successfully, 1 row(s) affected"
        );
        assert!(executor.last_result().await.is_none());

        executor.run("SELECT * FROM t", Some("db"), auto).await.unwrap();
        assert_eq!(executor.last_result().await.unwrap().row_count(), 1);
    }

    #[tokio::test]
    async fn test_smart_policy_only_opens_for_writes() {
        let executor = setup().await;
        executor
            .run("CREATE TABLE t (id INTEGER)", Some("db"), AutoCommitPolicy::Auto)
            .await
            .unwrap();

        executor
            .run("SELECT * FROM t", Some("db"), AutoCommitPolicy::Smart)
            .await
            .unwrap();
        assert_eq!(tx_state(&executor).await, (false, 0));

        executor
            .run("UPDATE t SET id = 2", Some("db"), AutoCommitPolicy::Smart)
            .await
            .unwrap();
        assert_eq!(tx_state(&executor).await, (true, 1));
    }

    #[tokio::test]
    async fn test_transaction_statements_are_routed() {
        let executor = setup().await;
        let outcome = executor
            .run("BEGIN;", Some("db"), AutoCommitPolicy::Auto)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Transaction {
                command: TxCommand::Begin,
                changed: true
            }
        ));
        // The coordinator, not the driver, saw the BEGIN: no count
        assert_eq!(tx_state(&executor).await, (true, 0));

        executor
            .run("rollback", Some("db"), AutoCommitPolicy::Auto)
            .await
            .unwrap();
        assert_eq!(tx_state(&executor).await, (false, 0));
    }

    #[tokio::test]
    async fn test_failure_outside_transaction_is_bare() {
        let executor = setup().await;
        let err = executor
            .run("SELEC oops", Some("db"), AutoCommitPolicy::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[tokio::test]
    async fn test_failure_in_implicit_transaction_rolls_back() {
        let executor = setup().await;
        let err = executor
            .run("INSERT INTO missing VALUES (1)", Some("db"), AutoCommitPolicy::Off)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::QueryRolledBack { .. }));
        assert_eq!(tx_state(&executor).await, (false, 0));
    }
}
