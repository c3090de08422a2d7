//! Direct HTTP probe implementation.
//!
//! Treats the channel address as a direct HTTP(S) media endpoint: a probe is
//! a GET that must answer 2xx, and the body is the stream itself, exposed as
//! a single `source` rendition. Platforms with real quality ladders get their
//! own [`StreamProbe`] implementations; this one is the lowest common
//! denominator and the default for the CLI runner.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use crate::{ProbeError, Rendition, RenditionReader, StreamProbe};

/// Connect timeout for probe and open requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`StreamProbe`] over plain HTTP(S).
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Create a probe with its own HTTP client.
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Create a probe reusing an existing HTTP client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamProbe for HttpProbe {
    async fn probe(&self, address: &Url) -> Result<Vec<Rendition>, ProbeError> {
        match address.scheme() {
            "http" | "https" => {}
            other => return Err(ProbeError::Unsupported(format!("{other}://"))),
        }

        let response = self.client.get(address.clone()).send().await?;
        let status = response.status();
        debug!(%address, %status, "probe response");

        if status.is_success() {
            Ok(vec![Rendition::source(address.clone())])
        } else if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::GONE
        {
            Err(ProbeError::Offline)
        } else {
            Err(ProbeError::Http(status))
        }
    }

    async fn open(&self, rendition: &Rendition) -> Result<RenditionReader, ProbeError> {
        let response = self
            .client
            .get(rendition.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other);

        Ok(Box::new(StreamReader::new(stream)))
    }
}
