use std::io;
use std::path::PathBuf;

use thiserror::Error;

use dcmanager_config::ConfigFileError;
use dcmanager_oracle::OracleError;
use dcmanager_types::ParseVersionError;

use crate::HandoffFlag;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status surface unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected status answer: {0:?}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("failed to manage the assistant: {0}")]
    Assistant(#[from] ContainerError),

    /// The flag never turned true within its bound
    #[error("{flag} flag not raised after {attempts} polls")]
    Timeout { flag: HandoffFlag, attempts: u32 },

    #[error("hand-off cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The assistant never got ready; the previous instance is untouched
    #[error("key hand-off could not start: {0}")]
    Handoff(#[from] HandoffError),

    /// The new instance runs but never received its key
    #[error("key hand-off did not complete: {source}")]
    HandoffIncomplete {
        #[source]
        source: HandoffError,
    },

    #[error("invalid {which} version: {source}")]
    InvalidVersion {
        which: &'static str,
        #[source]
        source: ParseVersionError,
    },

    #[error("no source could provide image for version {version}")]
    ImageUnavailable { version: String },

    #[error("failed to stage image at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist the node image: {0}")]
    Persist(#[from] ConfigFileError),

    /// The new instance did not start; the previous image was started again
    #[error("new instance failed to start and was rolled back: {source}")]
    RolledBack {
        #[source]
        source: ContainerError,
    },

    #[error("new instance did not report its version after {attempts} polls")]
    VerificationTimeout { attempts: u32 },

    #[error("new instance reports version {found}, expected {expected}")]
    VersionMismatch { expected: String, found: String },

    /// The new instance runs an unauthorized enclave and has been stopped
    #[error("new instance reports enclave {found}, expected {expected}; instance stopped")]
    IdentityMismatch { expected: String, found: String },

    /// An image was rejected for running an unauthorized enclave; the node
    /// is not started again until the daemon is restarted
    #[error("refusing to start the node: image {image} ran an unauthorized enclave")]
    Quarantined { image: String },

    #[error("upgrade cycle cancelled")]
    Cancelled,
}

impl UpgradeError {
    /// Whether the node is left in a state only an operator can resolve.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            Self::HandoffIncomplete { .. }
                | Self::IdentityMismatch { .. }
                | Self::Quarantined { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another daemon holds {}", .0.display())]
    Held(PathBuf),

    #[error("failed to open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
