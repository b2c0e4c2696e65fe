//! HTTP transport for manifest exchange and file upload

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{Stream, StreamExt};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::TransportError;

/// Per-request transfer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Gzip the request body
    pub compress: bool,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl TransferOptions {
    /// Options with the given timeout and compression flag
    #[must_use]
    pub fn new(timeout: Duration, compress: bool) -> Self {
        Self { compress, timeout }
    }
}

/// Network transfer used by the synchronizer and the multiplexer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the optional status document and return the response body.
    ///
    /// Without a body the request is a plain GET. A non-success status is an
    /// error.
    async fn exchange(
        &self,
        url: &str,
        body: Option<Vec<u8>>,
        options: TransferOptions,
    ) -> Result<Vec<u8>, TransportError>;

    /// POST the file at `path` and return the HTTP status code
    async fn upload_file(
        &self,
        url: &str,
        path: &Path,
        options: TransferOptions,
    ) -> Result<u16, TransportError>;
}

/// [`Transport`] over HTTP(S)
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport sharing an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(
        &self,
        url: &str,
        body: Option<Vec<u8>>,
        options: TransferOptions,
    ) -> Result<Vec<u8>, TransportError> {
        let request = match body {
            Some(body) => {
                let request = self
                    .client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json");
                if options.compress {
                    request
                        .header(reqwest::header::CONTENT_ENCODING, "gzip")
                        .body(gzip(&body)?)
                } else {
                    request.body(body)
                }
            }
            None => self.client.get(url),
        };

        let response = request
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        debug!(url, bytes = bytes.len(), "Exchange completed");
        Ok(bytes.to_vec())
    }

    async fn upload_file(
        &self,
        url: &str,
        path: &Path,
        options: TransferOptions,
    ) -> Result<u16, TransportError> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream");

        let file = tokio::fs::File::open(path).await?;
        let request = if options.compress {
            request
                .header(reqwest::header::CONTENT_ENCODING, "gzip")
                .body(reqwest::Body::wrap_stream(gzip_stream(file)))
        } else {
            request.body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
        };

        let response = request
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        Ok(response.status().as_u16())
    }
}

/// Gzip-compress a buffer
pub fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Gzip `reader` as it is read, yielding compressed output as the encoder
/// produces it. At most one read chunk and the encoder window are held in
/// memory.
pub fn gzip_stream<R>(reader: R) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    futures::stream::try_unfold(
        Some((ReaderStream::new(reader), encoder)),
        |state| async move {
            let Some((mut chunks, mut encoder)) = state else {
                return Ok(None);
            };
            while let Some(chunk) = chunks.next().await {
                encoder.write_all(&chunk?)?;
                let compressed = std::mem::take(encoder.get_mut());
                if !compressed.is_empty() {
                    return Ok(Some((compressed, Some((chunks, encoder)))));
                }
            }
            let tail = encoder.finish()?;
            Ok(Some((tail, None)))
        },
    )
}
