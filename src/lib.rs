use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio::io::{AsyncRead, AsyncSeek};

pub mod client;
pub mod config;
pub mod progress;
pub mod source;
pub mod store;
pub mod transport;
pub mod uploader;

#[cfg(test)]
mod test_server;

pub use client::Client;
pub use config::Config;
pub use progress::Snapshot;
pub use source::Upload;
pub use uploader::Uploader;

/// Error type returned by transports and stores.
pub type BoxError = Box<dyn snafu::Error + Send + Sync>;

/// A stream that can be read and repositioned, such as a file or a cursor.
pub trait AsyncReadSeek: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> AsyncReadSeek for T {}

/// What the server acknowledged after a chunk was sent.
#[derive(Debug, Clone, Default)]
pub struct ChunkResponse {
    /// The offset the server now holds. The next chunk starts here.
    pub offset: u64,
    pub headers: HeaderMap,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one chunk that starts at `offset` to the upload at `url`.
    ///
    /// The caller never retries a failed call.
    async fn send_chunk(
        &self,
        url: &str,
        payload: Vec<u8>,
        offset: u64,
    ) -> Result<ChunkResponse, BoxError>;
}
