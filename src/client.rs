use std::sync::Arc;

use reqwest::Url;
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{
    config, transport::Http, transport::HttpError, uploader, BoxError, Config, Upload, Uploader,
};

/// Creates and resumes uploads on a tus server.
#[derive(Debug)]
pub struct Client {
    url: Url,
    config: Config,
    transport: Arc<Http>,
}

impl Client {
    /// url: the endpoint uploads are created at.
    pub fn new(url: &str, config: Config) -> Result<Self, Error> {
        config.validate().context(ConfigSnafu)?;
        let endpoint = Url::parse(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let transport = Arc::new(Http::new(config.headers.clone()));

        Ok(Self {
            url: endpoint,
            config,
            transport,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a new upload on the server and return an uploader starting at 0.
    pub async fn create_upload(&self, upload: Upload) -> Result<Uploader, Error> {
        let url = self
            .transport
            .create(&self.url, &upload)
            .await
            .context(HttpSnafu)?;

        if self.config.resume && !upload.fingerprint().is_empty() {
            if let Some(store) = &self.config.store {
                store
                    .set(upload.fingerprint(), &url)
                    .await
                    .context(StoreSnafu)?;
            }
        }

        self.uploader(url, upload, 0)
    }

    /// Continue an upload previously created for the same fingerprint.
    pub async fn resume_upload(&self, upload: Upload) -> Result<Uploader, Error> {
        let (url, offset) = self.resume_offset(&upload).await?;
        self.uploader(url, upload, offset)
    }

    /// Resume the upload when the store and the server still know it,
    /// otherwise create a new one.
    pub async fn create_or_resume_upload(&self, upload: Upload) -> Result<Uploader, Error> {
        match self.resume_offset(&upload).await {
            Ok((url, offset)) => self.uploader(url, upload, offset),
            Err(Error::FingerprintNotSet)
            | Err(Error::UploadNotStored { .. })
            | Err(Error::Http {
                source: HttpError::UploadNotFound { .. },
            }) => {
                debug!("No upload to resume for {:?}, creating one", upload.fingerprint());
                self.create_upload(upload).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resume_offset(&self, upload: &Upload) -> Result<(String, u64), Error> {
        let store = match (&self.config.store, self.config.resume) {
            (Some(store), true) => store,
            _ => return Err(Error::ResumeNotEnabled),
        };
        if upload.fingerprint().is_empty() {
            return Err(Error::FingerprintNotSet);
        }

        let url = store
            .get(upload.fingerprint())
            .await
            .context(StoreSnafu)?
            .ok_or_else(|| Error::UploadNotStored {
                fingerprint: upload.fingerprint().to_string(),
            })?;
        let offset = self.transport.offset(&url).await.context(HttpSnafu)?;
        debug!("Resuming {} at offset {}", url, offset);

        Ok((url, offset))
    }

    fn uploader(&self, url: String, upload: Upload, offset: u64) -> Result<Uploader, Error> {
        Uploader::new(
            self.transport.clone(),
            self.config.chunk_size,
            url,
            upload,
            offset,
        )
        .context(UploaderSnafu)
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid configuration: {}", source))]
    Config { source: config::Error },

    #[snafu(display("Invalid url {}: {}", url, message))]
    InvalidUrl { url: String, message: String },

    #[snafu(display("{}", source))]
    Http { source: HttpError },

    #[snafu(display("Store failed: {}", source))]
    Store { source: BoxError },

    #[snafu(display("Resuming is not enabled"))]
    ResumeNotEnabled,

    #[snafu(display("Upload has no fingerprint"))]
    FingerprintNotSet,

    #[snafu(display("No upload stored for fingerprint {}", fingerprint))]
    UploadNotStored { fingerprint: String },

    #[snafu(display("Failed to start upload: {}", source))]
    Uploader { source: uploader::Error },
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, io::Cursor, sync::Arc};

    use super::*;
    use crate::{store::MemoryStore, store::Store, test_server::TusServer};

    fn resumable_config(store: Arc<MemoryStore>) -> Config {
        Config {
            chunk_size: 4,
            resume: true,
            store: Some(store),
            ..Default::default()
        }
    }

    fn upload(data: &[u8]) -> Upload {
        let metadata = BTreeMap::from([("filename".to_string(), "data.bin".to_string())]);
        Upload::new(
            Cursor::new(data.to_vec()),
            data.len() as u64,
            metadata,
            "data.bin-10",
        )
    }

    #[test]
    fn rejects_invalid_setup() {
        let err = Client::new("not a url", Config::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));

        let config = Config {
            resume: true,
            ..Default::default()
        };
        let err = Client::new("http://localhost/files", config).unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                source: config::Error::MissingStore
            }
        ));
    }

    #[tokio::test]
    async fn create_upload_sends_everything() {
        let server = TusServer::start().await;
        let config = Config {
            chunk_size: 3,
            ..Default::default()
        };
        let client = Client::new(&server.endpoint(), config).unwrap();

        let mut uploader = client.create_upload(upload(b"0123456789")).await.unwrap();
        uploader.upload().await.unwrap();

        assert_eq!(uploader.offset(), 10);
        assert_eq!(server.data(uploader.url()), Some(b"0123456789".to_vec()));
        assert_eq!(
            server.metadata(uploader.url()).as_deref(),
            Some("filename ZGF0YS5iaW4=")
        );
    }

    #[tokio::test]
    async fn resumes_interrupted_upload() {
        let server = TusServer::start().await;
        let store = Arc::new(MemoryStore::new());
        let client = Client::new(&server.endpoint(), resumable_config(store.clone())).unwrap();

        let mut first = client.create_upload(upload(b"0123456789")).await.unwrap();
        first.upload_chunk().await.unwrap();
        let url = first.url().to_string();
        first.close().await;
        assert_eq!(store.get("data.bin-10").await.unwrap(), Some(url.clone()));

        let mut resumed = client
            .create_or_resume_upload(upload(b"0123456789"))
            .await
            .unwrap();
        assert_eq!(resumed.url(), url);
        assert_eq!(resumed.offset(), 4);

        resumed.upload().await.unwrap();
        assert_eq!(server.data(&url), Some(b"0123456789".to_vec()));
        assert_eq!(server.patches(&url), 3);
    }

    #[tokio::test]
    async fn creates_when_nothing_to_resume() {
        let server = TusServer::start().await;
        let store = Arc::new(MemoryStore::new());
        let client = Client::new(&server.endpoint(), resumable_config(store.clone())).unwrap();

        let err = client.resume_upload(upload(b"abc")).await.unwrap_err();
        assert!(matches!(err, Error::UploadNotStored { .. }));

        store
            .set("data.bin-10", &format!("{}/gone", server.endpoint()))
            .await
            .unwrap();
        let uploader = client
            .create_or_resume_upload(upload(b"abc"))
            .await
            .unwrap();
        assert_eq!(uploader.offset(), 0);
        assert_ne!(uploader.url(), format!("{}/gone", server.endpoint()));
        assert_eq!(
            store.get("data.bin-10").await.unwrap().as_deref(),
            Some(uploader.url())
        );
    }

    #[tokio::test]
    async fn resume_requires_configuration() {
        let server = TusServer::start().await;
        let client = Client::new(&server.endpoint(), Config::default()).unwrap();

        let err = client
            .create_or_resume_upload(upload(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResumeNotEnabled));
    }
}
