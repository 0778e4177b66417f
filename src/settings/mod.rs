//! Settings store.
//!
//! The desktop shell owns one settings document holding the model-provider
//! credentials, the MCP server list, the last imported descriptor path and
//! the saved chat sessions. The core reaches it through [`SettingsStore`]
//! and re-reads it on every operation instead of caching it.
//!
//! - [`JsonFileStore`]: one JSON file on disk
//! - [`InMemoryStore`]: process-local, for embedding and tests

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::mcp::config::{ServerConfig, validate_unique_ids};
use crate::session::{ChatMessage, ChatSession};

/// Model used when the request names none and no configured model is enabled.
pub const FALLBACK_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

impl ModelEntry {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
        }
    }
}

/// OpenAI-compatible provider endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub models: Vec<ModelEntry>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            models: vec![
                ModelEntry::new("gpt-4o", "GPT-4o"),
                ModelEntry::new("gpt-3.5-turbo", "GPT-3.5 Turbo"),
            ],
        }
    }
}

impl ProviderSettings {
    /// Whether both the API key and the base URL are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.base_url.is_empty()
    }

    /// The requested model, else the first enabled one, else [`FALLBACK_MODEL`].
    #[must_use]
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .filter(|m| !m.is_empty())
            .map(ToString::to_string)
            .or_else(|| {
                self.models
                    .iter()
                    .find(|m| m.enabled)
                    .map(|m| m.id.clone())
            })
            .unwrap_or_else(|| FALLBACK_MODEL.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub servers: Vec<ServerConfig>,
    #[serde(rename = "configPath")]
    pub config_path: String,
}

/// The whole settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub theme: Theme,
    pub openai: ProviderSettings,
    pub mcp: McpSettings,
    pub sessions: Vec<ChatSession>,
}

/// User-facing settings as shown on the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub theme: Theme,
    pub openai: ProviderSettings,
}

/// Partial update of [`GeneralSettings`]; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneralSettingsPatch {
    pub theme: Option<Theme>,
    pub openai: Option<ProviderSettings>,
}

/// A mutation applied by [`SettingsStore::update`]. Returning an error
/// discards the change.
pub type SettingsMutation =
    Box<dyn FnOnce(&mut AppSettings) -> Result<(), SettingsError> + Send>;

/// Access to the settings document.
///
/// Implementors provide [`load`](Self::load) and an atomic
/// [`update`](Self::update); everything else is derived from those two.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the current document. A missing document yields the defaults.
    async fn load(&self) -> Result<AppSettings, SettingsError>;

    /// Apply `mutate` to the current document and persist the result.
    /// Concurrent updates are serialized.
    async fn update(&self, mutate: SettingsMutation) -> Result<(), SettingsError>;

    async fn general_settings(&self) -> Result<GeneralSettings, SettingsError> {
        let s = self.load().await?;
        Ok(GeneralSettings {
            theme: s.theme,
            openai: s.openai,
        })
    }

    async fn save_general_settings(&self, patch: GeneralSettingsPatch) -> Result<(), SettingsError> {
        self.update(Box::new(move |s| {
            if let Some(theme) = patch.theme {
                s.theme = theme;
            }
            if let Some(openai) = patch.openai {
                s.openai = openai;
            }
            Ok(())
        }))
        .await
    }

    async fn provider_settings(&self) -> Result<ProviderSettings, SettingsError> {
        Ok(self.load().await?.openai)
    }

    async fn save_provider_settings(&self, provider: ProviderSettings) -> Result<(), SettingsError> {
        self.update(Box::new(move |s| {
            s.openai = provider;
            Ok(())
        }))
        .await
    }

    async fn mcp_servers(&self) -> Result<Vec<ServerConfig>, SettingsError> {
        Ok(self.load().await?.mcp.servers)
    }

    /// Replace the server list. Rejects lists that reuse an id.
    async fn save_mcp_servers(&self, servers: Vec<ServerConfig>) -> Result<(), SettingsError> {
        validate_unique_ids(&servers)?;
        self.update(Box::new(move |s| {
            s.mcp.servers = servers;
            Ok(())
        }))
        .await
    }

    /// Path of the last imported descriptor; empty if none.
    async fn mcp_config_path(&self) -> Result<String, SettingsError> {
        Ok(self.load().await?.mcp.config_path)
    }

    async fn set_mcp_config_path(&self, path: String) -> Result<(), SettingsError> {
        self.update(Box::new(move |s| {
            s.mcp.config_path = path;
            Ok(())
        }))
        .await
    }

    async fn sessions(&self) -> Result<Vec<ChatSession>, SettingsError> {
        Ok(self.load().await?.sessions)
    }

    /// Store a new session ahead of the existing ones.
    async fn create_session(&self, session: ChatSession) -> Result<(), SettingsError> {
        self.update(Box::new(move |s| {
            s.sessions.insert(0, session);
            Ok(())
        }))
        .await
    }

    /// Replace a session's messages and optionally its title.
    /// Returns whether the session existed.
    async fn update_session(
        &self,
        id: String,
        messages: Vec<ChatMessage>,
        title: Option<String>,
    ) -> Result<bool, SettingsError> {
        let found = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&found);
        self.update(Box::new(move |s| {
            if let Some(session) = s.sessions.iter_mut().find(|x| x.id == id) {
                session.messages = messages;
                if let Some(title) = title.filter(|t| !t.is_empty()) {
                    session.title = title;
                }
                flag.store(true, Ordering::Relaxed);
            }
            Ok(())
        }))
        .await?;
        Ok(found.load(Ordering::Relaxed))
    }

    async fn delete_session(&self, id: String) -> Result<(), SettingsError> {
        self.update(Box::new(move |s| {
            s.sessions.retain(|x| x.id != id);
            Ok(())
        }))
        .await
    }
}
