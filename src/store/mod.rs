use async_trait::async_trait;

use crate::BoxError;

mod memory;

pub use memory::MemoryStore;

#[cfg(feature = "file-store")]
mod file;
#[cfg(feature = "file-store")]
pub use file::FileStore;

/// Remembers which upload URL belongs to a source fingerprint, so an
/// interrupted upload can be found again.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>, BoxError>;

    async fn set(&self, fingerprint: &str, url: &str) -> Result<(), BoxError>;

    async fn delete(&self, fingerprint: &str) -> Result<(), BoxError>;
}
