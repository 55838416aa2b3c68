use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Store;
use crate::BoxError;

/// A store that forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    urls: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>, BoxError> {
        Ok(self.urls.read().await.get(fingerprint).cloned())
    }

    async fn set(&self, fingerprint: &str, url: &str) -> Result<(), BoxError> {
        self.urls
            .write()
            .await
            .insert(fingerprint.to_string(), url.to_string());
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<(), BoxError> {
        self.urls.write().await.remove(fingerprint);
        Ok(())
    }
}
