use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    Method, RequestBuilder, StatusCode, Url,
};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{BoxError, ChunkResponse, Transport, Upload};

/// The protocol version sent with every request.
pub const TUS_VERSION: &str = "1.0.0";

const TUS_RESUMABLE: &str = "tus-resumable";
const UPLOAD_OFFSET: &str = "upload-offset";
const UPLOAD_LENGTH: &str = "upload-length";
const UPLOAD_METADATA: &str = "upload-metadata";
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Speaks the tus resumable upload protocol over HTTP.
#[derive(Debug, Clone)]
pub struct Http {
    client: reqwest::Client,
    headers: HeaderMap,
}

impl Http {
    /// headers: sent with every request, e.g. authorization.
    pub fn new(headers: HeaderMap) -> Self {
        Self::with_client(reqwest::Client::new(), headers)
    }

    pub fn with_client(client: reqwest::Client, headers: HeaderMap) -> Self {
        Self { client, headers }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
    }

    /// Create an upload on the server at `endpoint` and return its url.
    pub async fn create(&self, endpoint: &Url, upload: &Upload) -> Result<String, Error> {
        let mut request = self
            .request(Method::POST, endpoint.as_str())
            .header(UPLOAD_LENGTH, upload.size())
            .header(CONTENT_LENGTH, 0);
        let metadata = upload.encoded_metadata();
        if !metadata.is_empty() {
            request = request.header(UPLOAD_METADATA, metadata);
        }

        let response = request.send().await.with_context(|_| RequestSnafu {
            url: endpoint.to_string(),
        })?;

        match response.status() {
            StatusCode::CREATED => {
                let location = header_str(response.headers(), LOCATION.as_str())?;
                let url = endpoint.join(location).map_err(|e| Error::InvalidLocation {
                    location: location.to_string(),
                    message: e.to_string(),
                })?;
                debug!("Created upload {} of {} bytes", url, upload.size());
                Ok(url.to_string())
            }
            status => Err(status_error(status, endpoint.as_str())),
        }
    }

    /// Ask the server how many bytes of the upload at `url` it holds.
    pub async fn offset(&self, url: &str) -> Result<u64, Error> {
        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .with_context(|_| RequestSnafu {
                url: url.to_string(),
            })?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => parse_offset(response.headers()),
            status => Err(status_error(status, url)),
        }
    }

    async fn patch(
        &self,
        url: &str,
        payload: Vec<u8>,
        offset: u64,
    ) -> Result<ChunkResponse, Error> {
        let response = self
            .request(Method::PATCH, url)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(UPLOAD_OFFSET, offset)
            .body(payload)
            .send()
            .await
            .with_context(|_| RequestSnafu {
                url: url.to_string(),
            })?;

        match response.status() {
            StatusCode::NO_CONTENT => {
                let headers = response.headers().clone();
                let offset = parse_offset(&headers)?;
                Ok(ChunkResponse { offset, headers })
            }
            status => Err(status_error(status, url)),
        }
    }
}

#[async_trait]
impl Transport for Http {
    async fn send_chunk(
        &self,
        url: &str,
        payload: Vec<u8>,
        offset: u64,
    ) -> Result<ChunkResponse, BoxError> {
        Ok(self.patch(url, payload, offset).await?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Error> {
    let value = headers.get(name).ok_or_else(|| Error::MissingHeader {
        name: name.to_string(),
    })?;
    value.to_str().map_err(|_| Error::InvalidHeader {
        name: name.to_string(),
        value: String::from_utf8_lossy(value.as_bytes()).to_string(),
    })
}

fn parse_offset(headers: &HeaderMap) -> Result<u64, Error> {
    let value = header_str(headers, UPLOAD_OFFSET)?;
    value.trim().parse().map_err(|_| Error::InvalidHeader {
        name: UPLOAD_OFFSET.to_string(),
        value: value.to_string(),
    })
}

fn status_error(status: StatusCode, url: &str) -> Error {
    let url = url.to_string();
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Error::UploadNotFound { url },
        StatusCode::CONFLICT => Error::OffsetMismatch { url },
        StatusCode::PRECONDITION_FAILED => Error::VersionMismatch { url },
        StatusCode::PAYLOAD_TOO_LARGE => Error::UploadTooLarge { url },
        status => Error::UnexpectedStatus { status, url },
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Request to {} failed: {}", url, source))]
    Request { source: reqwest::Error, url: String },

    #[snafu(display("Upload {} not found", url))]
    UploadNotFound { url: String },

    #[snafu(display("Upload {} is at a different offset", url))]
    OffsetMismatch { url: String },

    #[snafu(display("Server at {} does not support tus {}", url, TUS_VERSION))]
    VersionMismatch { url: String },

    #[snafu(display("Upload is too large for {}", url))]
    UploadTooLarge { url: String },

    #[snafu(display("Unexpected status {} from {}", status, url))]
    UnexpectedStatus { status: StatusCode, url: String },

    #[snafu(display("Response is missing the {} header", name))]
    MissingHeader { name: String },

    #[snafu(display("Invalid {} header: {}", name, value))]
    InvalidHeader { name: String, value: String },

    #[snafu(display("Invalid location {}: {}", location, message))]
    InvalidLocation { location: String, message: String },
}
