use std::{fmt::Debug, sync::Arc};

use reqwest::header::HeaderMap;
use snafu::Snafu;

use crate::store::Store;

/// The size of each chunk when uploading a file.
/// 2 MB
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct Config {
    /// Maximum bytes sent in one request.
    pub chunk_size: usize,
    /// Look up and record upload urls in `store` so uploads can be resumed.
    pub resume: bool,
    pub store: Option<Arc<dyn Store>>,
    /// Extra headers sent with every request, such as authorization.
    pub headers: HeaderMap,
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("chunk_size", &self.chunk_size)
            .field("resume", &self.resume)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            resume: false,
            store: None,
            headers: HeaderMap::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::ChunkSize);
        }
        if self.resume && self.store.is_none() {
            return Err(Error::MissingStore);
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Chunk size must be at least one byte"))]
    ChunkSize,

    #[snafu(display("Resuming uploads requires a store"))]
    MissingStore,
}
