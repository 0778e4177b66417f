use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use crate::error::{McpError, SettingsError};
use crate::settings::SettingsStore;

/// One configured tool server.
///
/// `id` is caller-supplied (imports use the descriptor key) and must be
/// unique within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    /// Display name, also used as the tool namespace prefix.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the inherited process environment at spawn time.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub enabled: bool,
}

/// The `{ "mcpServers": { ... } }` descriptor shared with other MCP hosts.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpServerEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpConfig {
    /// Convert every entry into an enabled [`ServerConfig`] keyed by its name.
    pub fn into_server_configs(self) -> Vec<ServerConfig> {
        self.mcp_servers
            .into_iter()
            .map(|(name, entry)| ServerConfig {
                id: name.clone(),
                name,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                enabled: true,
            })
            .collect()
    }
}

pub async fn load_mcp_config(path: impl AsRef<Path>) -> Result<McpConfig, McpError> {
    let path = path.as_ref();
    let descriptor_err = |message: String| McpError::Descriptor {
        path: path.display().to_string(),
        message,
    };
    let txt = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| descriptor_err(e.to_string()))?;
    serde_json::from_str(&txt).map_err(|e| descriptor_err(e.to_string()))
}

/// Replace the stored server list with the descriptor at `path` and remember
/// the path, in a single store update. Returns the number of imported servers.
pub async fn import_descriptor(
    store: &dyn SettingsStore,
    path: &str,
) -> Result<usize, ImportError> {
    let servers = load_mcp_config(path).await?.into_server_configs();
    validate_unique_ids(&servers)?;
    let count = servers.len();
    let recorded = path.to_string();
    store
        .update(Box::new(move |s| {
            s.mcp.servers = servers;
            s.mcp.config_path = recorded;
            Ok(())
        }))
        .await?;

    tracing::info!(path = %path, count, "Imported MCP config descriptor");
    Ok(count)
}

/// Re-sync the stored server list from the last imported descriptor, if any.
///
/// Never fails: a missing or unreadable descriptor leaves the stored list as is.
pub async fn sync_from_descriptor_file(store: &dyn SettingsStore) {
    let path = match store.mcp_config_path().await {
        Ok(p) if !p.is_empty() => p,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read MCP config path from settings");
            return;
        }
    };
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return;
    }

    let servers = match load_mcp_config(&path).await {
        Ok(cfg) => cfg.into_server_configs(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to sync MCP servers from config file");
            return;
        }
    };
    let count = servers.len();
    match store.save_mcp_servers(servers).await {
        Ok(()) => tracing::info!(path = %path, count, "Synced MCP servers from config file"),
        Err(e) => tracing::error!(error = %e, "Failed to store synced MCP servers"),
    }
}

/// Errors from [`import_descriptor`].
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Descriptor(#[from] McpError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Reject server lists that reuse an id.
pub fn validate_unique_ids(servers: &[ServerConfig]) -> Result<(), SettingsError> {
    let mut seen = HashSet::new();
    for s in servers {
        if !seen.insert(s.id.as_str()) {
            return Err(SettingsError::Invalid(format!(
                "duplicate MCP server id: {}",
                s.id
            )));
        }
    }
    Ok(())
}

/// Expand "${VAR}" placeholders from the process environment.
/// Unknown variables are left as-is.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = input.to_string();
    for (k, v) in std::env::vars() {
        let needle = format!("${{{k}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, &v);
        }
    }
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
