//! Live upgrade of the storage node.
//!
//! An [`UpgradeCoordinator`] cycle compares the running node with the
//! program authorized on the ledger, fetches the new image from the content
//! network or a registry, and swaps the node container while the assistant
//! carries the node key over. The [`Scheduler`] repeats cycles on a timer.

mod container;
mod coordinator;
mod error;
mod handoff;
mod image;
mod lock;
mod scheduler;
mod status;

pub use container::{ContainerRuntime, ContainerSpec, DockerCli, Sgx};
pub use coordinator::{
    Collaborators, ConfigFileStore, NodeImageStore, Phase, RetryCounters, UpgradeCoordinator,
    UpgradeOutcome, UpgradeSession,
};
pub use error::{ContainerError, HandoffError, LockError, StatusError, UpgradeError};
pub use handoff::{HandoffFlag, HandoffPolicy, KeyHandoff};
pub use image::{ContentDownloader, FetchedImage, ImageFetcher, NetworkDownloader};
pub use lock::DaemonLock;
pub use scheduler::{Scheduler, ServiceFlag};
pub use status::{HttpStatusClient, NodeIdentity, Service, StatusSurface};

pub use dcmanager_metrics::ImageSource;
