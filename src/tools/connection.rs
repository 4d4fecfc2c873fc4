//! Connection management tools.
//!
//! - `list_connections`: saved profiles with their live status
//! - `connect` / `disconnect`
//! - `test_connection`: connect and close without registering
//! - `use_connection`: choose the active connection
//! - `remove_connection`: delete a profile (disconnecting it first)

use crate::db::DisconnectReport;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionStatus;
use crate::session::Workbench;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Input for tools that act on one saved profile.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectionIdInput {
    /// Connection ID from list_connections
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListConnectionsOutput {
    pub connections: Vec<ConnectionStatus>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connection: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectOutput {
    pub connection_id: String,
    pub connected: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DisconnectOutput {
    #[serde(flatten)]
    pub report: DisconnectReport,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TestConnectionOutput {
    pub connection_id: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct UseConnectionOutput {
    pub active_connection: String,
    /// False when the connection still has to be opened with `connect`
    pub connected: bool,
    pub message: String,
}

fn disconnect_message(report: &DisconnectReport) -> String {
    match (report.was_connected, report.rolled_back) {
        (false, _) => format!("Connection '{}' was not connected", report.connection_id),
        (true, true) => format!(
            "Disconnected from '{}'; the open transaction was rolled back",
            report.connection_id
        ),
        (true, false) => format!("Disconnected from '{}'", report.connection_id),
    }
}

/// Handler for connection tools.
pub struct ConnectionToolHandler {
    workbench: Workbench,
}

impl ConnectionToolHandler {
    pub fn new(workbench: Workbench) -> Self {
        Self { workbench }
    }

    pub async fn list_connections(&self) -> DbResult<ListConnectionsOutput> {
        let connections = self.workbench.statuses().await?;
        let active_connection = connections.iter().find(|c| c.active).map(|c| c.id.clone());
        Ok(ListConnectionsOutput {
            count: connections.len(),
            connections,
            active_connection,
        })
    }

    pub async fn connect(&self, input: ConnectionIdInput) -> DbResult<ConnectOutput> {
        self.workbench.connect(&input.connection_id).await?;
        Ok(ConnectOutput {
            message: format!("Connected to '{}'", input.connection_id),
            connection_id: input.connection_id,
            connected: true,
        })
    }

    pub async fn disconnect(&self, input: ConnectionIdInput) -> DbResult<DisconnectOutput> {
        let report = self.workbench.disconnect(&input.connection_id).await;
        Ok(DisconnectOutput {
            message: disconnect_message(&report),
            report,
        })
    }

    /// Connection failures are reported in the output, not as a tool error.
    pub async fn test_connection(&self, input: ConnectionIdInput) -> DbResult<TestConnectionOutput> {
        match self.workbench.test_connection(&input.connection_id).await {
            Ok(()) => Ok(TestConnectionOutput {
                message: format!("Connection '{}' is reachable", input.connection_id),
                connection_id: input.connection_id,
                success: true,
                suggestion: None,
            }),
            Err(e @ DbError::Connect { .. }) => {
                info!(connection_id = %input.connection_id, error = %e, "Connection test failed");
                Ok(TestConnectionOutput {
                    suggestion: e.suggestion().map(String::from),
                    message: e.to_string(),
                    connection_id: input.connection_id,
                    success: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn use_connection(&self, input: ConnectionIdInput) -> DbResult<UseConnectionOutput> {
        self.workbench.use_connection(&input.connection_id)?;
        let connected = self
            .workbench
            .registry()
            .is_connected(&input.connection_id)
            .await;
        let message = if connected {
            format!("Active connection is now '{}'", input.connection_id)
        } else {
            format!(
                "Active connection is now '{}'; call connect before running queries",
                input.connection_id
            )
        };
        Ok(UseConnectionOutput {
            active_connection: input.connection_id,
            connected,
            message,
        })
    }

    pub async fn remove_connection(&self, input: ConnectionIdInput) -> DbResult<DisconnectOutput> {
        let report = self.workbench.remove_profile(&input.connection_id).await?;
        Ok(DisconnectOutput {
            message: format!("Removed connection profile '{}'", input.connection_id),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_messages() {
        let mut report = DisconnectReport {
            connection_id: "app".into(),
            ..Default::default()
        };
        assert_eq!(disconnect_message(&report), "Connection 'app' was not connected");

        report.was_connected = true;
        report.rolled_back = true;
        assert!(disconnect_message(&report).contains("rolled back"));
    }
}
