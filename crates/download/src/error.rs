use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use dcmanager_network::FetchError;
use dcmanager_types::{ContentId, EntryKind, InvalidEntryName};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid secret: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Sealing a unit failed; only possible beyond the GCM length limit
    #[error("encryption failed")]
    EncryptionFailed,

    /// A unit failed authentication. Output written before it stays on disk.
    #[error("decryption failed at unit {unit}")]
    DecryptionFailed { unit: u64 },

    /// Reading the content stream failed, including when the received bytes
    /// do not match their identifier
    #[error("failed to read content stream: {0}")]
    Stream(#[source] io::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    InvalidEntryName(#[from] InvalidEntryName),

    #[error("{cid} was listed as a {expected:?} but is a {found:?}")]
    KindMismatch {
        cid: ContentId,
        expected: EntryKind,
        found: EntryKind,
    },

    #[error("download timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    /// No peer could serve the object.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Unavailable { .. }))
    }
}
