use std::{
    collections::BTreeMap,
    fmt::Debug,
    io::Cursor,
    path::Path,
    time::UNIX_EPOCH,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use snafu::{ResultExt, Snafu};
use tokio::fs::File;

use crate::{progress::Snapshot, AsyncReadSeek};

/// The data being uploaded together with how much of it the server holds.
pub struct Upload {
    pub(crate) stream: Box<dyn AsyncReadSeek>,
    size: u64,
    progress: u64,
    metadata: BTreeMap<String, String>,
    fingerprint: String,
}

impl Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("size", &self.size)
            .field("progress", &self.progress)
            .field("metadata", &self.metadata)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl Upload {
    /// Create an upload from any seekable stream.
    /// size: the number of bytes the stream holds.
    /// fingerprint: identity used to find a previous upload of the same data.
    pub fn new(
        stream: impl AsyncReadSeek + 'static,
        size: u64,
        metadata: BTreeMap<String, String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            stream: Box::new(stream),
            size,
            progress: 0,
            metadata,
            fingerprint: fingerprint.into(),
        }
    }

    /// Create an upload that reads from memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(Cursor::new(data), size, BTreeMap::new(), "")
    }

    /// Open a file for upload.
    ///
    /// The file name becomes the `filename` metadata entry and the
    /// fingerprint is derived from name, size and modification time.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).await.with_context(|_| OpenFileSnafu {
            path: path.to_string_lossy().to_string(),
        })?;
        let meta = file.metadata().await.with_context(|_| OpenFileSnafu {
            path: path.to_string_lossy().to_string(),
        })?;
        if meta.is_dir() {
            return Err(Error::IsDirectory {
                path: path.to_string_lossy().to_string(),
            });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let fingerprint = format!("{}-{}-{}", name, meta.len(), modified);
        let metadata = BTreeMap::from([("filename".to_string(), name)]);

        Ok(Self::new(file, meta.len(), metadata, fingerprint))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes acknowledged by the server so far.
    pub fn offset(&self) -> u64 {
        self.progress
    }

    /// Integer percentage of the upload acknowledged by the server.
    pub fn percent(&self) -> u64 {
        if self.size == 0 {
            return 100;
        }
        (self.progress as u128 * 100 / self.size as u128) as u64
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= self.size
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            total_size: self.size,
            bytes_acknowledged: self.progress,
        }
    }

    /// Metadata in the `Upload-Metadata` header form: `key base64(value)` pairs
    /// separated by commas.
    pub fn encoded_metadata(&self) -> String {
        self.metadata
            .iter()
            .map(|(k, v)| format!("{} {}", k, STANDARD.encode(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn set_progress(&mut self, offset: u64) {
        self.progress = offset.min(self.size);
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to open file {}: {}", path, source))]
    OpenFile {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("{} is a directory", path))]
    IsDirectory { path: String },
}
