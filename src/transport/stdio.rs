//! Stdio transport for the MCP server.
//!
//! JSON-RPC arrives on stdin and responses go to stdout, so logging must
//! stay on stderr.

use crate::error::{DbError, DbResult};
use crate::mcp::QueryDeckService;
use crate::session::Workbench;
use crate::transport::Transport;
use rmcp::{ServiceExt, transport::stdio};
use tokio::signal;
use tracing::{info, warn};

pub struct StdioTransport {
    workbench: Workbench,
}

impl StdioTransport {
    pub fn new(workbench: Workbench) -> Self {
        Self { workbench }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = QueryDeckService::new(self.workbench.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let (shutdown_requested, outcome) = tokio::select! {
            result = running_service.waiting() => {
                let outcome = match result {
                    Ok(_quit_reason) => {
                        info!("Client closed the session");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        Err(DbError::internal(format!("Stdio transport error: {}", e)))
                    }
                };
                (false, outcome)
            }
            signal_name = wait_for_signal() => {
                info!(signal = signal_name, "Shutting down (send again to force exit)");
                (true, Ok(()))
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                let signal_name = wait_for_signal().await;
                warn!(signal = signal_name, "Second signal, forcing exit");
                std::process::exit(1);
            });
        }

        // Open transactions are rolled back here, never left to the server
        self.workbench.shutdown().await;

        if shutdown_requested {
            // A blocking stdin read cannot be interrupted by select!
            info!("Exiting process");
            std::process::exit(0);
        }

        outcome
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Resolve on SIGINT or SIGTERM with the signal's name.
async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler");
        stream.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::settings::MemorySettings;
    use std::sync::Arc;

    #[test]
    fn test_stdio_transport_name() {
        let workbench = Workbench::new(Arc::new(MemorySettings::default()), PoolOptions::default());
        assert_eq!(StdioTransport::new(workbench).name(), "stdio");
    }
}
