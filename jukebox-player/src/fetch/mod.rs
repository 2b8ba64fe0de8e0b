//! Media retrieval
//!
//! The cache store never downloads anything itself; it hands a locator and a
//! destination path to a [`Fetcher`] and takes ownership of whatever file
//! appears there.

mod downloader;
mod locator;

pub use downloader::{parse_progress, DownloaderFetcher};
pub use locator::{Provider, SourceLocator};

use crate::error::ResolutionError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Metadata reported by a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub title: String,
    /// Unknown when the source did not report a length
    pub duration: Option<Duration>,
}

/// Retrieves a source into a local file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `locator` into `destination`
    ///
    /// On `Ok`, a file is expected at `destination`. The cache store verifies
    /// this and reports [`ResolutionError::NoFile`] otherwise.
    async fn fetch(
        &self,
        locator: &SourceLocator,
        destination: &Path,
    ) -> Result<FetchMetadata, ResolutionError>;
}
