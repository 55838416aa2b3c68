use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use snafu::{ResultExt, Snafu};
use tokio::{
    fs::OpenOptions,
    io::{AsyncSeekExt as _, AsyncWriteExt as _},
};
use tracing::debug;

use crate::{BoxError, ChunkResponse, Transport};

/// Writes uploads into a local folder. The upload url is a path relative to
/// that folder.
#[derive(Debug)]
pub struct Local {
    folder: PathBuf,
}

impl Local {
    /// Create a new instance of the local transport.
    /// folder: The folder where the files will be stored.
    pub fn new(folder: PathBuf) -> Self {
        Self { folder }
    }

    /// Bytes already stored for `url`, 0 if nothing was written yet.
    pub async fn offset(&self, url: &str) -> Result<u64, Error> {
        let path = self.resolve(url)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::OpenFile {
                source: e,
                msg: path.to_string_lossy().to_string(),
            }),
        }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(url);
        let valid = relative.components().count() > 0
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(Error::InvalidPath {
                path: url.to_string(),
            });
        }
        Ok(self.folder.join(relative))
    }

    async fn write_chunk(&self, url: &str, payload: &[u8], offset: u64) -> Result<u64, Error> {
        let path = self.resolve(url)?;
        debug!("Writing {} bytes at {} to {:?}", payload.len(), offset, &path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|_| CreateDirSnafu {
                    msg: parent.to_string_lossy().to_string(),
                })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .with_context(|_| OpenFileSnafu {
                msg: path.to_string_lossy().to_string(),
            })?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .with_context(|_| WriteDataSnafu {
                msg: path.to_string_lossy().to_string(),
            })?;
        file.write_all(payload)
            .await
            .with_context(|_| WriteDataSnafu {
                msg: path.to_string_lossy().to_string(),
            })?;
        file.flush().await.with_context(|_| WriteDataSnafu {
            msg: path.to_string_lossy().to_string(),
        })?;

        Ok(offset + payload.len() as u64)
    }
}

#[async_trait]
impl Transport for Local {
    async fn send_chunk(
        &self,
        url: &str,
        payload: Vec<u8>,
        offset: u64,
    ) -> Result<ChunkResponse, BoxError> {
        let offset = self.write_chunk(url, &payload, offset).await?;

        let mut headers = HeaderMap::new();
        headers.insert("upload-offset", HeaderValue::from(offset));
        Ok(ChunkResponse { offset, headers })
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid path: {}", path))]
    InvalidPath { path: String },

    #[snafu(display("Failed to create directory {}: {}", msg, source))]
    CreateDir {
        source: tokio::io::Error,
        msg: String,
    },

    #[snafu(display("Failed to open file {}: {}", msg, source))]
    OpenFile {
        source: tokio::io::Error,
        msg: String,
    },

    #[snafu(display("Failed to write data to {}: {}", msg, source))]
    WriteData {
        source: tokio::io::Error,
        msg: String,
    },
}
