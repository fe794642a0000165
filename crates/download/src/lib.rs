//! Downloading content objects to the local filesystem.
//!
//! A file object is streamed through a [`StreamDecryptor`], which strips the
//! storage header and decrypts the payload unit by unit when a secret is
//! given. A directory object is materialized by a [`DirectoryWalker`].

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error_span, info, warn, Instrument};

use dcmanager_metrics::{DownloadMetrics, DownloadOutcome};
use dcmanager_network::{ContentFetcher, ContentObject, FetchError};
use dcmanager_types::{ContentId, EntryKind, TransmitStatus};

mod decoder;
mod error;
mod key;
mod pipeline;
mod progress;
mod walker;

pub use decoder::{ChunkDecoder, HEADER_LEN, MAGIC, UNIT_SIZE};
pub use error::DownloadError;
pub use key::{SymmetricKey, KEY_LEN, NONCE_LEN, UNIT_OVERHEAD};
pub use pipeline::{StreamDecryptor, DEFAULT_CHANNEL_CAPACITY};
pub use progress::{LogProgress, NoProgress, ProgressSink, Throttled, PROGRESS_INTERVAL};
pub use walker::{DirectoryWalker, WalkSummary};

#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Secret the content was encrypted with, if any
    pub secret: Option<String>,

    /// Bound on the whole download; `None` waits indefinitely
    pub timeout: Option<Duration>,

    pub channel_capacity: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            secret: None,
            timeout: Some(Duration::from_secs(600)),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DownloadSummary {
    pub kind: EntryKind,
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Downloads the object named by `cid` to `dest`.
///
/// A file lands at `dest`; a directory becomes a tree rooted at `dest`.
/// Progress counts the bytes of the whole object, reported at most once per
/// [`PROGRESS_INTERVAL`] and closed by exactly one terminal report.
/// The session opened for the download is torn down before returning.
pub async fn download(
    fetcher: &ContentFetcher,
    cid: &ContentId,
    dest: &Path,
    options: &DownloadOptions,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<DownloadSummary, DownloadError> {
    let key = options
        .secret
        .as_deref()
        .map(SymmetricKey::from_secret)
        .transpose()?;

    let decryptor = StreamDecryptor::new(key).with_channel_capacity(options.channel_capacity);
    let cancel = cancel.child_token();

    let progress = Throttled::new(progress);
    let total = AtomicU64::new(0);

    let work = async {
        let fetched = async {
            let session = fetcher.open_session(cid).await?;
            let object = session.fetch(cid).await?;
            Ok::<_, FetchError>((session, object))
        };

        let (session, object) = cancellable(&cancel, fetched).await?;

        match object {
            ContentObject::File(file) => {
                let size = file.size();
                info!(size, peer = %file.peer(), "Receiving file");

                let bytes = decryptor
                    .write_file(file, dest, &progress, &total, &cancel)
                    .await?;

                Ok(DownloadSummary {
                    kind: EntryKind::File,
                    files: 1,
                    directories: 0,
                    bytes,
                })
            }

            ContentObject::Directory(listing) => {
                info!(entries = listing.len(), "Receiving directory");

                // Entries are fetched through the session that found the root
                let walk = DirectoryWalker::new(&session, &decryptor, &progress, &total, &cancel)
                    .walk(listing, dest)
                    .await?;

                Ok(DownloadSummary {
                    kind: EntryKind::Directory,
                    files: walk.files,
                    directories: walk.directories,
                    bytes: walk.bytes,
                })
            }
        }
    };

    let span = error_span!("download", %cid);
    let result = with_deadline(options.timeout, &cancel, work)
        .instrument(span)
        .await;

    let bytes = total.load(Ordering::Relaxed);
    let status = match &result {
        Ok(_) => TransmitStatus::Success,
        Err(_) => TransmitStatus::Failed,
    };
    progress.report(status, bytes);

    let metrics = DownloadMetrics::global();
    match &result {
        Ok(summary) => {
            metrics.record(DownloadOutcome::Success);
            info!(%cid, bytes = summary.bytes, "Download finished");
        }
        Err(e) if e.is_unavailable() => {
            metrics.record(DownloadOutcome::Unavailable);
            warn!(%cid, "{e}");
        }
        Err(e) => {
            metrics.record(DownloadOutcome::Failed);
            warn!(%cid, "Download failed: {e}");
        }
    }

    result
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, DownloadError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DownloadError::Cancelled),
        result = fut => result.map_err(DownloadError::from),
    }
}

/// Cancels `work` through `cancel` once `timeout` elapses and lets it wind
/// down, so its progress reporting still completes.
async fn with_deadline<T, F>(
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, DownloadError>
where
    F: Future<Output = Result<T, DownloadError>>,
{
    let Some(limit) = timeout else {
        return work.await;
    };

    tokio::pin!(work);

    tokio::select! {
        result = &mut work => result,
        () = tokio::time::sleep(limit) => {
            cancel.cancel();

            match work.await {
                Err(DownloadError::Cancelled) => Err(DownloadError::Timeout(limit)),
                other => other,
            }
        }
    }
}
