use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use advisory_lock::{AdvisoryFileLock, FileLockError, FileLockMode};
use tracing::warn;

use crate::LockError;

/// Exclusive advisory lock held for the lifetime of the daemon.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Takes the lock without blocking, creating the file if needed.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        match AdvisoryFileLock::try_lock(&file, FileLockMode::Exclusive) {
            Ok(()) => Ok(Self { file, path }),
            Err(FileLockError::AlreadyLocked) => Err(LockError::Held(path)),
            Err(FileLockError::Io(source)) => Err(io_err(source)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        if let Err(e) = AdvisoryFileLock::unlock(&self.file) {
            warn!(path = %self.path.display(), "Failed to release daemon lock: {e:?}");
        }
    }
}
