use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AppSettings, SettingsMutation, SettingsStore};
use crate::error::SettingsError;

/// Settings held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    doc: Mutex<AppSettings>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(initial: AppSettings) -> Self {
        Self {
            doc: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn load(&self) -> Result<AppSettings, SettingsError> {
        Ok(self.doc.lock().await.clone())
    }

    async fn update(&self, mutate: SettingsMutation) -> Result<(), SettingsError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        mutate(&mut next)?;
        *doc = next;
        Ok(())
    }
}
