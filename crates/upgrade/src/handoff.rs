use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dcmanager_config::UpgradeConfig;

use crate::{ContainerError, ContainerRuntime, ContainerSpec, HandoffError, StatusSurface};

/// Flags the assistant raises while moving the node key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandoffFlag {
    /// The assistant obtained the key from the running instance
    SecretReceived,
    /// The assistant passed the key on to the new instance
    SecretDelivered,
}

impl HandoffFlag {
    pub fn path(self) -> &'static str {
        match self {
            Self::SecretReceived => "/secretflag",
            Self::SecretDelivered => "/upgradeflag",
        }
    }
}

impl fmt::Display for HandoffFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecretReceived => f.write_str("secret-received"),
            Self::SecretDelivered => f.write_str("secret-delivered"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandoffPolicy {
    pub poll_interval: Duration,
    pub received_attempts: u32,
    pub delivered_attempts: u32,
}

impl From<&UpgradeConfig> for HandoffPolicy {
    fn from(config: &UpgradeConfig) -> Self {
        Self {
            poll_interval: config.handoff_poll_interval,
            received_attempts: config.secret_received_attempts,
            delivered_attempts: config.secret_delivered_attempts,
        }
    }
}

/// Drives the assistant that carries the node key from the old instance to
/// the new one.
///
/// [`KeyHandoff::prepare`] must succeed before the old instance is stopped;
/// [`KeyHandoff::complete`] runs once the new instance is started.
pub struct KeyHandoff {
    runtime: Arc<dyn ContainerRuntime>,
    status: Arc<dyn StatusSurface>,
    assistant: ContainerSpec,
    policy: HandoffPolicy,
}

impl KeyHandoff {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        status: Arc<dyn StatusSurface>,
        assistant: ContainerSpec,
        policy: HandoffPolicy,
    ) -> Self {
        Self {
            runtime,
            status,
            assistant,
            policy,
        }
    }

    pub fn policy(&self) -> &HandoffPolicy {
        &self.policy
    }

    /// Replaces any assistant left over from an earlier attempt with a fresh one.
    pub async fn start_assistant(&self) -> Result<(), ContainerError> {
        self.runtime.stop(&self.assistant.name).await?;
        self.runtime.remove(&self.assistant.name).await?;
        self.runtime.start(&self.assistant).await
    }

    /// Starts the assistant and waits until it holds the key.
    /// On failure the assistant is stopped again.
    pub async fn prepare(&self, cancel: &CancellationToken) -> Result<(), HandoffError> {
        self.start_assistant().await?;

        let received = self
            .wait_for(HandoffFlag::SecretReceived, self.policy.received_attempts, cancel)
            .await;

        if received.is_err() {
            self.abort().await;
        }

        received
    }

    /// Waits until the assistant delivered the key, then stops it.
    pub async fn complete(&self, cancel: &CancellationToken) -> Result<(), HandoffError> {
        let delivered = self
            .wait_for(HandoffFlag::SecretDelivered, self.policy.delivered_attempts, cancel)
            .await;

        self.abort().await;
        delivered
    }

    /// Stops the assistant, logging rather than returning a failure.
    pub async fn abort(&self) {
        if let Err(e) = self.runtime.stop(&self.assistant.name).await {
            warn!(name = %self.assistant.name, "Failed to stop assistant: {e}");
        }
    }

    async fn wait_for(
        &self,
        flag: HandoffFlag,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<(), HandoffError> {
        for attempt in 1..=attempts {
            match self.status.flag(flag).await {
                Ok(true) => {
                    info!(%flag, attempt, "Hand-off flag raised");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!(%flag, attempt, "Assistant not answering: {e}"),
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(HandoffError::Cancelled),
                () = tokio::time::sleep(self.policy.poll_interval) => {}
            }
        }

        Err(HandoffError::Timeout { flag, attempts })
    }
}
