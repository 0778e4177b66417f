//! Process transport adapter.
//!
//! [`TransportFactory`] turns a [`ServerConfig`] into a live [`McpTransport`];
//! the production implementation spawns the configured command and speaks
//! MCP over its stdio via `rmcp`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{DynService, Peer, RoleClient, RunningService, ServiceError, ServiceExt},
    transport::TokioChildProcess,
};
use tokio::{process::Command, sync::Mutex};

use crate::error::McpError;
use crate::mcp::config::{ServerConfig, expand_env_map};
use crate::mcp::types::McpTool;

/// A bidirectional MCP channel to one server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Fetch the server's full tool catalog.
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;

    /// Invoke a tool and return the raw `tools/call` result.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, McpError>;

    /// Tear the channel down. Idempotent; succeeds if the process already exited.
    async fn close(&self) -> Result<(), McpError>;
}

/// Creates transports for the connection registry.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Spawn and handshake. Resolves to a single terminal error on failure.
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError>;
}

type DynClientService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Spawns each server as a child process and talks MCP over stdin/stdout.
#[derive(Debug, Clone)]
pub struct ChildProcessFactory {
    connect_timeout: Duration,
}

impl ChildProcessFactory {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TransportFactory for ChildProcessFactory {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args).kill_on_drop(true);
        for (k, v) in expand_env_map(&config.env) {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|source| McpError::Spawn {
            server: config.name.clone(),
            source,
        })?;

        // Dropping the pending handshake on timeout drops the transport and kills the child.
        let service = tokio::time::timeout(self.connect_timeout, ().into_dyn().serve(transport))
            .await
            .map_err(|_elapsed| McpError::ConnectTimeout {
                server: config.name.clone(),
                after: self.connect_timeout,
            })?
            .map_err(|e| McpError::Handshake {
                server: config.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Arc::new(ChildProcessTransport {
            server_name: config.name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }))
    }
}

/// A running stdio MCP session.
pub struct ChildProcessTransport {
    server_name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<DynClientService>>,
}

impl std::fmt::Debug for ChildProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcessTransport")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl ChildProcessTransport {
    fn map_service_error(&self, err: ServiceError) -> McpError {
        match err {
            ServiceError::TransportClosed => McpError::TransportClosed {
                server: self.server_name.clone(),
            },
            other => McpError::Protocol {
                server: self.server_name.clone(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl McpTransport for ChildProcessTransport {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| self.map_service_error(e))?;

        Ok(tools
            .into_iter()
            .map(|t| McpTool {
                name: t.name.to_string(),
                description: t.description.as_deref().map(ToString::to_string),
                input_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let res = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| self.map_service_error(e))?;

        serde_json::to_value(res).map_err(|e| McpError::Protocol {
            server: self.server_name.clone(),
            message: e.to_string(),
        })
    }

    async fn close(&self) -> Result<(), McpError> {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            service.cancel().await.map_err(|e| McpError::Protocol {
                server: self.server_name.clone(),
                message: format!("failed to stop session: {e}"),
            })?;
        }
        Ok(())
    }
}
