use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio::sync::Mutex;
use tracing::debug;

use super::Store;
use crate::BoxError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Entries {
    uploads: HashMap<String, String>,
}

/// A store kept as a JSON file, so uploads can be resumed after a restart.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// path: The JSON file. It is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, Error> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::default()),
            Err(e) => {
                return Err(Error::ReadStore {
                    source: e,
                    path: self.path.to_string_lossy().to_string(),
                })
            }
        };
        serde_json::from_slice(&data).with_context(|_| ParseStoreSnafu {
            path: self.path.to_string_lossy().to_string(),
        })
    }

    async fn save(&self, entries: &Entries) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|_| WriteStoreSnafu {
                    path: parent.to_string_lossy().to_string(),
                })?;
        }
        let data = serde_json::to_vec_pretty(entries).with_context(|_| ParseStoreSnafu {
            path: self.path.to_string_lossy().to_string(),
        })?;
        tokio::fs::write(&self.path, data)
            .await
            .with_context(|_| WriteStoreSnafu {
                path: self.path.to_string_lossy().to_string(),
            })
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>, BoxError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        Ok(entries.uploads.remove(fingerprint))
    }

    async fn set(&self, fingerprint: &str, url: &str) -> Result<(), BoxError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries
            .uploads
            .insert(fingerprint.to_string(), url.to_string());
        self.save(&entries).await?;
        debug!("Stored upload url for {} in {:?}", fingerprint, self.path);
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<(), BoxError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.uploads.remove(fingerprint).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read store {}: {}", path, source))]
    ReadStore {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("Failed to write store {}: {}", path, source))]
    WriteStore {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("Store {} is not valid JSON: {}", path, source))]
    ParseStore {
        source: serde_json::Error,
        path: String,
    },
}
