use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AppSettings, SettingsMutation, SettingsStore};
use crate::error::SettingsError;

/// Settings persisted as one JSON document.
///
/// The file is read on every call so edits made by another process are
/// picked up. Writes go to `<path>.tmp` and are renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<AppSettings, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) if txt.trim().is_empty() => Ok(AppSettings::default()),
            Ok(txt) => Ok(serde_json::from_str(&txt)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let body = serde_json::to_vec_pretty(settings)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> Result<AppSettings, SettingsError> {
        self.read().await
    }

    async fn update(&self, mutate: SettingsMutation) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read().await?;
        mutate(&mut doc)?;
        self.write(&doc).await?;

        tracing::debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await.unwrap(), AppSettings::default());
    }

    #[tokio::test]
    async fn updates_are_persisted_and_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = JsonFileStore::new(&path);
        assert_eq!(store.path(), path.as_path());
        store
            .set_mcp_config_path("/tmp/mcp.json".to_string())
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mcp"]["configPath"], "/tmp/mcp.json");
        assert!(!dir.path().join("nested").join("settings.json.tmp").exists());

        let other = JsonFileStore::new(&path);
        assert_eq!(other.mcp_config_path().await.unwrap(), "/tmp/mcp.json");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(SettingsError::Json(_))));
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("settings.json")));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create_session(ChatSession::new()).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(store.sessions().await.unwrap().len(), 8);
    }
}
