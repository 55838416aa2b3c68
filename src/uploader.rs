use std::{fmt::Debug, io::SeekFrom, sync::Arc};

use reqwest::header::HeaderMap;
use snafu::{ResultExt, Snafu};
use tokio::{
    io::{AsyncReadExt as _, AsyncSeekExt as _},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    progress::{Broadcaster, Snapshot},
    BoxError, Transport, Upload,
};

/// Sends an [`Upload`] chunk by chunk, starting from a known offset.
pub struct Uploader {
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    url: String,
    upload: Upload,
    offset: u64,
    aborted: CancellationToken,
    headers: HeaderMap,
    broadcaster: Broadcaster,
}

impl Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("url", &self.url)
            .field("chunk_size", &self.chunk_size)
            .field("offset", &self.offset)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl Uploader {
    /// Create an uploader for `upload` at `url`.
    /// offset: bytes the server already holds, 0 for a fresh upload.
    ///
    /// Spawns the progress relay, so it must be called inside a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        chunk_size: usize,
        url: impl Into<String>,
        mut upload: Upload,
        offset: u64,
    ) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::ChunkSize);
        }
        if offset > upload.size() {
            return Err(Error::OffsetBeyondSize {
                offset,
                size: upload.size(),
            });
        }
        upload.set_progress(offset);

        Ok(Self {
            transport,
            chunk_size,
            url: url.into(),
            upload,
            offset,
            aborted: CancellationToken::new(),
            headers: HeaderMap::new(),
            broadcaster: Broadcaster::spawn(),
        })
    }

    /// Register a channel that receives a [`Snapshot`] after every chunk.
    ///
    /// Delivery waits for the receiver, so an undrained channel stalls the
    /// upload once its buffer is full.
    pub async fn subscribe(&self, subscriber: mpsc::Sender<Snapshot>) {
        self.broadcaster.subscribe(subscriber).await;
    }

    /// Stop before the next chunk. A chunk already in flight still completes.
    pub fn abort(&self) {
        self.aborted.cancel();
    }

    /// A handle that aborts this uploader from another task.
    pub fn abort_handle(&self) -> CancellationToken {
        self.aborted.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    /// Bytes acknowledged by the server.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Response headers of every chunk so far. Repeated names keep every value.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn source(&self) -> &Upload {
        &self.upload
    }

    /// Upload chunks until the server holds the whole source or the uploader
    /// is aborted. Aborting is not an error.
    pub async fn upload(&mut self) -> Result<(), Error> {
        while self.offset < self.upload.size() && !self.is_aborted() {
            self.upload_chunk().await?;
        }

        if self.is_aborted() {
            debug!("Upload to {} aborted at offset {}", self.url, self.offset);
        }
        Ok(())
    }

    /// Read one chunk at the current offset and send it.
    ///
    /// On failure nothing about the uploader changes.
    pub async fn upload_chunk(&mut self) -> Result<(), Error> {
        let offset = self.offset;
        let mut buffer = vec![0; self.chunk_size];

        self.upload
            .stream
            .seek(SeekFrom::Start(offset))
            .await
            .context(SeekSnafu { offset })?;
        let len = self
            .upload
            .stream
            .read(&mut buffer)
            .await
            .context(ReadSnafu { offset })?;
        if len == 0 {
            return Err(Error::UnexpectedEof {
                offset,
                size: self.upload.size(),
            });
        }
        buffer.truncate(len);

        debug!("Sending {} bytes at offset {} to {}", len, offset, self.url);
        let response = self
            .transport
            .send_chunk(&self.url, buffer, offset)
            .await
            .context(TransportSnafu { offset })?;

        if response.offset < offset || response.offset > self.upload.size() {
            return Err(Error::InvalidOffset {
                offset: response.offset,
                current: offset,
                size: self.upload.size(),
            });
        }
        if response.offset == offset {
            return Err(Error::NoProgress { offset, sent: len });
        }

        self.offset = response.offset;
        self.upload.set_progress(response.offset);
        for (name, value) in response.headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }

        self.broadcaster.notify(self.upload.snapshot()).await;

        Ok(())
    }

    /// Stop the progress relay once every pending snapshot is delivered and
    /// hand the source back.
    pub async fn close(self) -> Upload {
        self.broadcaster.close().await;
        self.upload
    }
}

/// Errors from building an uploader or sending a chunk.
///
/// `Seek`, `Read` and `Transport` keep the failing call's error untouched;
/// `source()` returns it as it was produced.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Chunk size must be at least one byte"))]
    ChunkSize,

    #[snafu(display("Start offset {} is beyond the upload size {}", offset, size))]
    OffsetBeyondSize { offset: u64, size: u64 },

    #[snafu(display("Failed to seek to offset {}: {}", offset, source))]
    Seek {
        source: std::io::Error,
        offset: u64,
    },

    #[snafu(display("Failed to read chunk at offset {}: {}", offset, source))]
    Read {
        source: std::io::Error,
        offset: u64,
    },

    #[snafu(display("Source ended at offset {} before its size {}", offset, size))]
    UnexpectedEof { offset: u64, size: u64 },

    #[snafu(display("Failed to send chunk at offset {}: {}", offset, source))]
    Transport { source: BoxError, offset: u64 },

    #[snafu(display(
        "Server returned offset {} after {}, upload size is {}",
        offset,
        current,
        size
    ))]
    InvalidOffset { offset: u64, current: u64, size: u64 },

    #[snafu(display("Server did not advance past offset {} after {} bytes", offset, sent))]
    NoProgress { offset: u64, sent: usize },
}
