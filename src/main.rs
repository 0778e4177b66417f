//! MCP chat core server
//!
//! Entry point for the local chat backend the desktop shell talks to.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_chat_core::config::AppConfig;
use mcp_chat_core::mcp::config::sync_from_descriptor_file;
use mcp_chat_core::mcp::{ChildProcessFactory, ConnectionRegistry};
use mcp_chat_core::server::{self, AppState};
use mcp_chat_core::settings::{JsonFileStore, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    info!(
        name: "config.loaded",
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let store = Arc::new(JsonFileStore::new(config.store.path.clone()));
    info!(path = %store.path().display(), "Using settings store");
    sync_from_descriptor_file(store.as_ref()).await;

    let factory = Arc::new(ChildProcessFactory::new(config.mcp.connect_timeout()));
    let registry = Arc::new(ConnectionRegistry::new(factory));

    // MCP: connect every enabled server at startup
    match store.mcp_servers().await {
        Ok(servers) => registry.initialize(&servers).await,
        Err(e) => tracing::error!(error = %e, "Could not read MCP servers; starting without tools"),
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = AppState::new(Arc::clone(&registry), store);
    let result = server::serve(listener, state, shutdown_signal()).await;

    info!(name: "server.stopping", "Shutting down MCP connections");
    registry.shutdown_all().await;

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
