//! Connection registry.
//!
//! The registry is the only owner of transports. Every enabled
//! [`ServerConfig`] maps to at most one live [`Connection`]; handshakes run
//! outside the lock and are tagged with an epoch so a stale attempt that
//! finishes after its record was replaced or removed closes its own
//! transport instead of leaking it.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::mcp::config::ServerConfig;
use crate::mcp::tools::{self, ConnectedServer, ToolSet};
use crate::mcp::transport::{McpTransport, TransportFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

/// Observability snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub id: String,
    pub name: String,
    pub status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Connection {
    config: ServerConfig,
    transport: Option<Arc<dyn McpTransport>>,
    state: ConnectionState,
    last_error: Option<String>,
    epoch: u64,
}

pub struct ConnectionRegistry {
    factory: Arc<dyn TransportFactory>,
    connections: RwLock<HashMap<String, Connection>>,
    next_epoch: AtomicU64,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            connections: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Connect every enabled config concurrently. Individual failures are
    /// recorded on their connection.
    pub async fn initialize(&self, configs: &[ServerConfig]) {
        let attempts = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| self.connect(c.clone()));
        join_all(attempts).await;

        let connections = self.connections.read().await.len();
        tracing::info!(
            name: "mcp.initialized",
            connections,
            "MCP registry initialized"
        );
    }

    /// Bring the tracked connections in line with the enabled subset of `configs`.
    pub async fn reconcile(&self, configs: &[ServerConfig]) {
        let target: HashMap<&str, &ServerConfig> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.id.as_str(), c))
            .collect();

        let (stale, needed): (Vec<String>, Vec<ServerConfig>) = {
            let conns = self.connections.read().await;
            let stale = conns
                .keys()
                .filter(|id| !target.contains_key(id.as_str()))
                .cloned()
                .collect();
            let needed = target
                .values()
                .filter(|cfg| {
                    conns.get(&cfg.id).is_none_or(|c| {
                        matches!(
                            c.state,
                            ConnectionState::Error | ConnectionState::Disconnected
                        )
                    })
                })
                .map(|cfg| (*cfg).clone())
                .collect();
            (stale, needed)
        };

        tracing::info!(
            removed = stale.len(),
            connecting = needed.len(),
            "Reconciling MCP connections"
        );

        join_all(stale.iter().map(|id| self.disconnect(id))).await;
        join_all(needed.into_iter().map(|cfg| self.connect(cfg))).await;
    }

    /// (Re)connect one server. Any existing connection for the id is torn
    /// down first. Never fails; the outcome lands on the connection record.
    pub async fn connect(&self, config: ServerConfig) {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let id = config.id.clone();

        let previous = {
            let mut conns = self.connections.write().await;
            conns.insert(
                id.clone(),
                Connection {
                    config: config.clone(),
                    transport: None,
                    state: ConnectionState::Connecting,
                    last_error: None,
                    epoch,
                },
            )
        };
        if let Some(prev) = previous {
            close_connection(prev).await;
        }

        tracing::info!(server = %config.name, command = %config.command, "Connecting to MCP server");
        let outcome = self.factory.connect(&config).await;

        let orphan = {
            let mut conns = self.connections.write().await;
            match conns.get_mut(&id) {
                Some(conn) if conn.epoch == epoch => {
                    match outcome {
                        Ok(transport) => {
                            conn.transport = Some(transport);
                            conn.state = ConnectionState::Connected;
                            tracing::info!(server = %config.name, "Connected to MCP server");
                        }
                        Err(e) => {
                            conn.state = ConnectionState::Error;
                            conn.last_error = Some(e.to_string());
                            tracing::error!(server = %config.name, error = %e, "Failed to connect to MCP server");
                        }
                    }
                    None
                }
                // Record replaced or removed while we were handshaking.
                _ => outcome.ok(),
            }
        };

        if let Some(transport) = orphan {
            tracing::debug!(server = %config.name, "Discarding superseded MCP connection");
            if let Err(e) = transport.close().await {
                tracing::warn!(server = %config.name, error = %e, "Failed to close MCP transport");
            }
        }
    }

    /// Close and forget a connection. No-op if the id is not tracked.
    pub async fn disconnect(&self, id: &str) {
        let removed = self.connections.write().await.remove(id);
        if let Some(conn) = removed {
            tracing::info!(server = %conn.config.name, "Disconnecting MCP server");
            close_connection(conn).await;
        }
    }

    /// Snapshot of every tracked connection, ordered by id.
    pub async fn list_status(&self) -> Vec<ConnectionStatus> {
        let conns = self.connections.read().await;
        let mut out: Vec<ConnectionStatus> = conns
            .iter()
            .map(|(id, c)| ConnectionStatus {
                id: id.clone(),
                name: c.config.name.clone(),
                status: c.state,
                error: c.last_error.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Connected servers ordered by id, with the epoch of each record.
    async fn connected_servers(&self) -> Vec<(ConnectedServer, u64)> {
        let conns = self.connections.read().await;
        let mut out: Vec<(ConnectedServer, u64)> = conns
            .iter()
            .filter(|(_, c)| c.state == ConnectionState::Connected)
            .filter_map(|(id, c)| {
                c.transport.as_ref().map(|t| {
                    (
                        ConnectedServer {
                            id: id.clone(),
                            name: c.config.name.clone(),
                            transport: Arc::clone(t),
                        },
                        c.epoch,
                    )
                })
            })
            .collect();
        out.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        out
    }

    /// Aggregate the tools of every connected server into a fresh set.
    pub async fn build_tool_set(&self) -> ToolSet {
        let snapshot = self.connected_servers().await;
        let (servers, epochs): (Vec<ConnectedServer>, Vec<u64>) = snapshot.into_iter().unzip();

        let catalogs = tools::fetch_catalogs(&servers).await;

        let closed: HashSet<(String, u64)> = servers
            .iter()
            .zip(&epochs)
            .zip(&catalogs)
            .filter(|(_, catalog)| catalog.as_ref().is_err_and(|e| e.is_transport_closed()))
            .map(|((s, epoch), _)| (s.id.clone(), *epoch))
            .collect();
        if !closed.is_empty() {
            self.mark_disconnected(&closed).await;
        }

        tools::assemble(&servers, catalogs)
    }

    async fn mark_disconnected(&self, closed: &HashSet<(String, u64)>) {
        let mut conns = self.connections.write().await;
        for (id, epoch) in closed {
            if let Some(conn) = conns.get_mut(id).filter(|c| c.epoch == *epoch) {
                tracing::warn!(server = %conn.config.name, "MCP server transport closed");
                conn.state = ConnectionState::Disconnected;
                conn.last_error = Some("transport closed".to_string());
            }
        }
    }

    /// Disconnect everything concurrently.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Connection> = {
            let mut conns = self.connections.write().await;
            conns.drain().map(|(_, c)| c).collect()
        };
        let count = drained.len();
        join_all(drained.into_iter().map(close_connection)).await;
        tracing::info!(count, "All MCP connections shut down");
    }
}

async fn close_connection(conn: Connection) {
    if let Some(transport) = conn.transport {
        if let Err(e) = transport.close().await {
            tracing::warn!(server = %conn.config.name, error = %e, "Failed to close MCP transport");
        }
    }
}
