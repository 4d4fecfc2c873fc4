//! Transaction management tools.
//!
//! - `begin_transaction`: open a transaction on a connection
//! - `commit`: commit it
//! - `rollback`: roll it back
//!
//! Each is a no-op with an informational message when there is nothing to
//! do (begin while open, commit/rollback while idle).

use crate::error::DbResult;
use crate::models::{RunOutcome, TxCommand};
use crate::session::Workbench;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the begin_transaction, commit and rollback tools.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TransactionInput {
    /// Connection ID from list_connections. Defaults to the active connection.
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Output from the transaction tools.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TransactionOutput {
    pub connection_id: String,
    pub command: TxCommand,
    /// False when the call was a no-op
    pub changed: bool,
    pub in_transaction: bool,
    /// Human-readable status message
    pub message: String,
}

/// Handler for transaction management tools.
pub struct TransactionToolHandler {
    workbench: Workbench,
}

impl TransactionToolHandler {
    pub fn new(workbench: Workbench) -> Self {
        Self { workbench }
    }

    pub async fn handle(
        &self,
        command: TxCommand,
        input: TransactionInput,
    ) -> DbResult<TransactionOutput> {
        let connection_id = self.workbench.resolve(input.connection_id.as_deref())?;
        let id = Some(connection_id.as_str());
        let changed = match command {
            TxCommand::Begin => self.workbench.begin(id).await?,
            TxCommand::Commit => self.workbench.commit(id).await?,
            TxCommand::Rollback => self.workbench.rollback(id).await?,
        };
        let in_transaction = self
            .workbench
            .transaction_state(&connection_id)
            .await
            .is_some_and(|(open, _)| open);

        Ok(TransactionOutput {
            message: RunOutcome::Transaction { command, changed }.message(),
            connection_id,
            command,
            changed,
            in_transaction,
        })
    }
}
