//! Stream probing capability.
//!
//! This crate defines the boundary between the scheduling core and whatever
//! actually talks to a hosting platform: a [`StreamProbe`] answers "is this
//! address live, and with which renditions", and opens a chosen rendition as
//! a plain byte reader. The scheduling core never sees protocol details.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use url::Url;

mod http;
mod rendition;

pub use http::HttpProbe;
pub use rendition::{Rendition, RenditionPreference, select_rendition};

/// Errors produced while probing or opening a stream.
///
/// The scheduler collapses every variant to a single "not live" outcome; the
/// distinction exists only so logs can say what actually happened.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("address not supported: {0}")]
    Unsupported(String),

    #[error("stream is offline or has ended")]
    Offline,

    #[error("unexpected HTTP status: {0}")]
    Http(reqwest::StatusCode),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte source for one opened rendition.
pub type RenditionReader = Box<dyn AsyncRead + Send + Unpin>;

/// Liveness probing and stream opening for one hosting platform.
///
/// Implementations must be cheap to share; the scheduler holds one behind an
/// `Arc` and calls it from many tasks concurrently.
#[async_trait]
pub trait StreamProbe: Send + Sync {
    /// Check whether `address` is live.
    ///
    /// Returns the selectable renditions on success. An empty list means the
    /// address resolved but nothing is playable, which callers should treat
    /// the same as offline.
    async fn probe(&self, address: &Url) -> Result<Vec<Rendition>, ProbeError>;

    /// Open a persistent read handle on a rendition returned by [`probe`].
    ///
    /// [`probe`]: StreamProbe::probe
    async fn open(&self, rendition: &Rendition) -> Result<RenditionReader, ProbeError>;
}
