use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dcmanager_download::{download, DownloadError, DownloadOptions, LogProgress};
use dcmanager_metrics::{ImageSource, UpgradeMetrics};
use dcmanager_network::ContentFetcher;
use dcmanager_types::{AuthorizedProgram, ContentId};

use crate::{ContainerRuntime, UpgradeError};

/// Fetches a content object to a local path.
#[async_trait]
pub trait ContentDownloader: Send + Sync {
    async fn download(
        &self,
        cid: &ContentId,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError>;
}

/// [`ContentDownloader`] over the content network.
pub struct NetworkDownloader {
    fetcher: ContentFetcher,
    options: DownloadOptions,
}

impl NetworkDownloader {
    pub fn new(fetcher: ContentFetcher, options: DownloadOptions) -> Self {
        Self { fetcher, options }
    }
}

#[async_trait]
impl ContentDownloader for NetworkDownloader {
    async fn download(
        &self,
        cid: &ContentId,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let progress = LogProgress::new(None);
        let summary = download(&self.fetcher, cid, dest, &self.options, &progress, cancel).await?;

        Ok(summary.bytes)
    }
}

/// An image made available to the container runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedImage {
    /// Reference the new node container is started from
    pub reference: String,
    pub source: ImageSource,
}

/// Makes the image of an authorized program available locally.
///
/// The content network is tried first, one identifier at a time, each under
/// its own deadline. The registries are the fallback.
pub struct ImageFetcher {
    runtime: Arc<dyn ContainerRuntime>,
    downloader: Arc<dyn ContentDownloader>,
    staging_dir: PathBuf,
    attempt_timeout: Duration,
    prefer_mirror: bool,
}

impl ImageFetcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        downloader: Arc<dyn ContentDownloader>,
        staging_dir: impl Into<PathBuf>,
        attempt_timeout: Duration,
        prefer_mirror: bool,
    ) -> Self {
        Self {
            runtime,
            downloader,
            staging_dir: staging_dir.into(),
            attempt_timeout,
            prefer_mirror,
        }
    }

    /// Registry references to pull, in the order they are tried.
    pub fn registry_order<'a>(&self, program: &'a AuthorizedProgram) -> Vec<&'a str> {
        let (first, second) = if self.prefer_mirror {
            (&program.mirror_url, &program.origin_url)
        } else {
            (&program.origin_url, &program.mirror_url)
        };

        [first, second]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub async fn fetch(
        &self,
        program: &AuthorizedProgram,
        cancel: &CancellationToken,
    ) -> Result<FetchedImage, UpgradeError> {
        let fetched = match self.from_network(program, cancel).await? {
            Some(fetched) => fetched,
            None => self.from_registry(program, cancel).await?,
        };

        UpgradeMetrics::global().record_image(fetched.source);
        info!(reference = %fetched.reference, source = ?fetched.source, "Image ready");

        Ok(fetched)
    }

    async fn from_network(
        &self,
        program: &AuthorizedProgram,
        cancel: &CancellationToken,
    ) -> Result<Option<FetchedImage>, UpgradeError> {
        if program.content_ids.is_empty() {
            return Ok(None);
        }

        // A network image is tagged with its origin reference
        let Some(reference) = [&program.origin_url, &program.mirror_url]
            .into_iter()
            .find(|s| !s.trim().is_empty())
        else {
            warn!("Program names no image reference, skipping content network");
            return Ok(None);
        };

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| UpgradeError::Staging {
                path: self.staging_dir.clone(),
                source,
            })?;

        for cid in &program.content_ids {
            if cancel.is_cancelled() {
                return Err(UpgradeError::Cancelled);
            }

            let tarball = self.staging_dir.join(format!("{cid}.tar"));
            let attempt = cancel.child_token();

            let downloaded = tokio::time::timeout(
                self.attempt_timeout,
                self.downloader.download(cid, &tarball, &attempt),
            )
            .await;

            let loaded = match downloaded {
                Ok(Ok(bytes)) => {
                    info!(%cid, bytes, "Image tarball downloaded");
                    self.runtime.load_image(&tarball).await.map_err(|e| e.to_string())
                }
                Ok(Err(DownloadError::Cancelled)) if cancel.is_cancelled() => {
                    remove_staged(&tarball).await;
                    return Err(UpgradeError::Cancelled);
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => {
                    attempt.cancel();
                    Err(format!("timed out after {:?}", self.attempt_timeout))
                }
            };

            remove_staged(&tarball).await;

            match loaded {
                Ok(()) => {
                    return Ok(Some(FetchedImage {
                        reference: reference.trim().to_string(),
                        source: ImageSource::Network,
                    }))
                }
                Err(e) => warn!(%cid, "Failed to fetch image from the content network: {e}"),
            }
        }

        Ok(None)
    }

    async fn from_registry(
        &self,
        program: &AuthorizedProgram,
        cancel: &CancellationToken,
    ) -> Result<FetchedImage, UpgradeError> {
        for reference in self.registry_order(program) {
            let pulled = tokio::select! {
                () = cancel.cancelled() => return Err(UpgradeError::Cancelled),
                pulled = self.runtime.pull_image(reference) => pulled,
            };

            match pulled {
                Ok(()) => {
                    return Ok(FetchedImage {
                        reference: reference.to_string(),
                        source: ImageSource::Registry,
                    })
                }
                Err(e) => warn!(%reference, "Failed to pull image: {e}"),
            }
        }

        Err(UpgradeError::ImageUnavailable {
            version: program.version.clone(),
        })
    }
}

async fn remove_staged(tarball: &Path) {
    match tokio::fs::remove_file(tarball).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tarball.display(), "Failed to remove image tarball: {e}"),
    }
}
