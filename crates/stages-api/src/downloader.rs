//! Downloader capability and a stage fetching remote artifacts.
//!
//! The pipeline never implements downloads itself. Callers provide a
//! [`DownloaderFactory`]; stages ask it for a [`Downloader`] per artifact and
//! await its `fetch`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::PipelineError;
use crate::stage::{Content, DEFAULT_BATCH_SIZE, Stage, StageIo};

/// Default number of fetches a download stage runs at once
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 10;

/// Errors reported by downloaders.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("Digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

/// What is already known about an artifact before it is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 digest.
    pub sha256: Option<String>,
}

impl ArtifactDescriptor {
    /// Check a finished download against the expected size and digest.
    pub fn verify(&self, result: &DownloadResult) -> Result<(), DownloadError> {
        if let Some(expected) = self.size
            && expected != result.size
        {
            return Err(DownloadError::SizeMismatch {
                url: result.url.to_string(),
                expected,
                actual: result.size,
            });
        }
        if let Some(expected) = &self.sha256
            && !expected.eq_ignore_ascii_case(&result.sha256)
        {
            return Err(DownloadError::DigestMismatch {
                url: result.url.to_string(),
                expected: expected.clone(),
                actual: result.sha256.clone(),
            });
        }
        Ok(())
    }
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub url: Url,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// One pending fetch.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub destination: PathBuf,
    pub expected: Option<ArtifactDescriptor>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self) -> Result<DownloadResult, DownloadError>;
}

/// Builds a downloader for one artifact.
pub trait DownloaderFactory: Send + Sync + 'static {
    fn build(
        &self,
        url: &Url,
        destination: &Path,
        expected: Option<&ArtifactDescriptor>,
    ) -> Box<dyn Downloader>;
}

/// Content that references remote artifacts.
pub trait RemoteArtifacts: Content {
    /// Artifacts of this item that still have to be fetched.
    fn pending_downloads(&self) -> Vec<DownloadRequest>;

    /// Record a finished download on the item.
    fn attach_download(&mut self, result: DownloadResult);
}

/// Stage fetching the pending artifacts of every item before passing it on.
///
/// Items are read in batches; the fetches of a batch run with bounded
/// concurrency. Items leave the stage in the order they arrived.
pub struct ArtifactDownloadStage<F> {
    factory: F,
    batch_size: usize,
    max_concurrent: usize,
}

impl<F: DownloaderFactory> ArtifactDownloadStage<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    async fn fetch(&self, request: DownloadRequest) -> Result<DownloadResult, DownloadError> {
        let downloader =
            self.factory
                .build(&request.url, &request.destination, request.expected.as_ref());
        let result = downloader.fetch().await?;
        if let Some(expected) = &request.expected {
            expected.verify(&result)?;
        }
        debug!(url = %result.url, size = result.size, "Fetched artifact");
        Ok(result)
    }
}

#[async_trait]
impl<T, F> Stage<T> for ArtifactDownloadStage<F>
where
    T: RemoteArtifacts,
    F: DownloaderFactory,
{
    fn name(&self) -> &str {
        "ArtifactDownloadStage"
    }

    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let this = &*self;
        let (inbound, outbound) = io.split();
        let mut batches = inbound.batches(this.batch_size);
        while let Some(mut batch) = batches.next().await? {
            let requests: Vec<(usize, DownloadRequest)> = batch
                .iter()
                .enumerate()
                .flat_map(|(index, item)| {
                    item.pending_downloads()
                        .into_iter()
                        .map(move |request| (index, request))
                })
                .collect();

            let results: Vec<(usize, DownloadResult)> = stream::iter(requests)
                .map(|(index, request)| async move {
                    this.fetch(request).await.map(|result| (index, result))
                })
                .buffered(this.max_concurrent)
                .try_collect()
                .await?;

            for (index, result) in results {
                batch[index].attach_download(result);
            }
            for item in batch {
                outbound.put(item).await?;
            }
        }
        Ok(())
    }
}
