//! Service configuration.
//!
//! Layers, lowest first: built-in defaults, a config file,
//! `MCP_CHAT_*` environment variables, then command-line flags.

use std::path::PathBuf;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Command-line flags. Each one overrides the matching config key.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (0 picks a free port)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Settings document path
    #[arg(long)]
    pub store_path: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ListenConfig,
    pub mcp: McpSection,
    pub store: StoreConfig,
}

/// Listener address; port 0 lets the OS choose.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSection {
    /// Upper bound on spawn plus handshake for one server.
    pub connect_timeout_secs: u64,
}

impl McpSection {
    #[must_use]
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where the settings document lives.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl AppConfig {
    /// Load from the process arguments and environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Precedence: CLI flag > `MCP_CHAT_*` env > config file > defaults.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 0)?
            .set_default("mcp.connect_timeout_secs", 10)?
            .set_default("store.path", "mcp-chat-settings.json")?;

        // An explicit file must exist; the cwd fallback is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        // E.g. MCP_CHAT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("MCP_CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(path) = cli.store_path {
            builder = builder.set_override("store.path", path)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
