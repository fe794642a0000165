use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::UpgradeCoordinator;

const DESIRED: &str = "start";
const NOT_DESIRED: &str = "stop";

/// Operator intent for the storage node, persisted in a file.
///
/// The node is wanted while the file reads `start`. A missing or unreadable
/// file means it is not.
#[derive(Clone, Debug)]
pub struct ServiceFlag {
    path: PathBuf,
}

impl ServiceFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_desired(&self) -> bool {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.trim() == DESIRED,
            Err(_) => false,
        }
    }

    pub async fn set(&self, desired: bool) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = if desired { DESIRED } else { NOT_DESIRED };
        tokio::fs::write(&self.path, content).await
    }
}

/// Runs upgrade cycles on a fixed interval while the service flag is set.
pub struct Scheduler {
    interval: Duration,
    flag: ServiceFlag,
}

impl Scheduler {
    pub fn new(interval: Duration, flag: ServiceFlag) -> Self {
        Self { interval, flag }
    }

    /// Returns once `cancel` fires. A cycle in progress is given the token
    /// and finishes before this returns.
    pub async fn run(&self, coordinator: &mut UpgradeCoordinator, cancel: &CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, flag = %self.flag.path().display(), "Upgrade scheduler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.flag.is_desired().await {
                debug!("Service not desired, skipping cycle");
                continue;
            }

            // Outcomes are logged and counted by the coordinator
            let _ = coordinator.run_cycle(cancel).await;
        }

        info!("Upgrade scheduler stopped");
    }
}
