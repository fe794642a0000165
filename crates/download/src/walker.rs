use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dcmanager_network::{ContentObject, DownloadSession};
use dcmanager_types::{DirectoryListing, EntryKind};

use crate::{cancellable, DownloadError, ProgressSink, StreamDecryptor};

/// What a walk put on disk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Subdirectories created below the destination
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Materializes a directory object as a local tree.
///
/// Entries are processed one at a time in listing order. The first failing
/// entry ends the walk; files already written are left in place.
///
/// Progress is reported against `total`, the byte count of the whole tree.
/// The walker only makes intermediate reports; the terminal one is left to
/// the caller.
pub struct DirectoryWalker<'a> {
    session: &'a DownloadSession,
    decryptor: &'a StreamDecryptor,
    progress: &'a dyn ProgressSink,
    total: &'a AtomicU64,
    cancel: &'a CancellationToken,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(
        session: &'a DownloadSession,
        decryptor: &'a StreamDecryptor,
        progress: &'a dyn ProgressSink,
        total: &'a AtomicU64,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session,
            decryptor,
            progress,
            total,
            cancel,
        }
    }

    pub async fn walk(
        &self,
        listing: DirectoryListing,
        dest: &Path,
    ) -> Result<WalkSummary, DownloadError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| DownloadError::write(dest, e))?;

        let mut summary = WalkSummary::default();
        self.walk_into(listing, dest.to_path_buf(), &mut summary)
            .await?;

        info!(
            dest = %dest.display(),
            files = summary.files,
            directories = summary.directories,
            bytes = summary.bytes,
            "Directory downloaded"
        );

        Ok(summary)
    }

    fn walk_into<'s>(
        &'s self,
        listing: DirectoryListing,
        dest: PathBuf,
        summary: &'s mut WalkSummary,
    ) -> BoxFuture<'s, Result<(), DownloadError>> {
        Box::pin(async move {
            for entry in listing {
                entry.validate_name()?;

                let path = dest.join(&entry.name);
                debug!(cid = %entry.cid, path = %path.display(), "Fetching entry");

                let object = cancellable(self.cancel, self.session.fetch(&entry.cid)).await?;

                match (entry.kind, object) {
                    (EntryKind::Directory, ContentObject::Directory(child)) => {
                        tokio::fs::create_dir_all(&path)
                            .await
                            .map_err(|e| DownloadError::write(&path, e))?;

                        summary.directories += 1;
                        self.walk_into(child, path, summary).await?;
                    }

                    (EntryKind::File, ContentObject::File(file)) => {
                        summary.bytes += self
                            .decryptor
                            .write_file(file, &path, self.progress, self.total, self.cancel)
                            .await?;

                        summary.files += 1;
                    }

                    (expected, object) => {
                        let found = match object {
                            ContentObject::File(_) => EntryKind::File,
                            ContentObject::Directory(_) => EntryKind::Directory,
                        };

                        return Err(DownloadError::KindMismatch {
                            cid: entry.cid,
                            expected,
                            found,
                        });
                    }
                }
            }

            Ok(())
        })
    }
}
