use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use dcmanager_config::{save_config, Config, ConfigFileError, NodeConfig};
use dcmanager_metrics::{CycleOutcome, ImageSource, UpgradeMetrics};
use dcmanager_oracle::{OracleError, TrustOracle};
use dcmanager_types::{AuthorizedProgram, ProgramVersion};

use crate::{
    ContainerRuntime, ContainerSpec, ContentDownloader, FetchedImage, HandoffPolicy, ImageFetcher,
    KeyHandoff, NodeIdentity, Service, Sgx, StatusSurface, UpgradeError,
};

/// Phases of an upgrade cycle, in the order they are entered.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    #[default]
    Idle,
    CheckingLocalVersion,
    QueryingLedger,
    ValidatingAuthorization,
    ComparingVersions,
    FetchingImage,
    SwappingContainer,
    AwaitingKeyHandoff,
    VerifyingNewInstance,
}

impl Phase {
    pub fn index(self) -> i64 {
        self as i64
    }
}

/// What one cycle did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The running instance is current, or nothing newer is authorized
    NoUpgradeNeeded,

    /// The running instance could not be inspected; retried next cycle
    Deferred,

    Upgraded {
        from: NodeIdentity,
        to: NodeIdentity,
        source: ImageSource,
    },
}

/// State of the cycle in progress. Reset at the start of every cycle.
#[derive(Clone, Debug, Default)]
pub struct UpgradeSession {
    pub phase: Phase,
    pub local: Option<NodeIdentity>,
    pub target: Option<AuthorizedProgram>,
    pub fetched: Option<FetchedImage>,
}

/// Counters carried across cycles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryCounters {
    /// Consecutive cycles in which the node's status surface was unreachable
    pub unreachable_cycles: u32,
}

/// Persists the image the node container is started from.
pub trait NodeImageStore: Send + Sync {
    fn persist(&self, image: &str) -> Result<(), ConfigFileError>;
}

/// [`NodeImageStore`] writing the image back into the configuration file.
pub struct ConfigFileStore {
    path: PathBuf,
    config: Mutex<Config>,
}

impl ConfigFileStore {
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(config),
        }
    }
}

impl NodeImageStore for ConfigFileStore {
    fn persist(&self, image: &str) -> Result<(), ConfigFileError> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.node.image = image.to_string();
        save_config(&self.path, &config)
    }
}

/// External services the coordinator acts through.
pub struct Collaborators {
    pub oracle: Arc<dyn TrustOracle>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub status: Arc<dyn StatusSurface>,
    pub downloader: Arc<dyn ContentDownloader>,
    pub store: Arc<dyn NodeImageStore>,
}

/// Runs upgrade cycles against the local storage node.
///
/// A cycle compares the running instance with the authorized program and,
/// when a newer one is signed, fetches its image and swaps the node container
/// with the key hand-off in between. Cycles are strictly sequential.
pub struct UpgradeCoordinator {
    oracle: Arc<dyn TrustOracle>,
    runtime: Arc<dyn ContainerRuntime>,
    status: Arc<dyn StatusSurface>,
    store: Arc<dyn NodeImageStore>,
    images: ImageFetcher,
    handoff: Option<KeyHandoff>,
    node: NodeConfig,
    assistant: ContainerSpec,
    sgx: Sgx,
    pinned: Option<AuthorizedProgram>,
    verify_interval: Duration,
    verify_attempts: u32,
    assist_after: u32,
    counters: RetryCounters,
    session: UpgradeSession,
    quarantined: Option<String>,
}

impl UpgradeCoordinator {
    pub fn new(config: &Config, collaborators: Collaborators, sgx: Sgx) -> Self {
        let Collaborators {
            oracle,
            runtime,
            status,
            downloader,
            store,
        } = collaborators;

        let upgrade = &config.upgrade;
        let assistant = ContainerSpec::assistant(upgrade, sgx);

        let handoff = upgrade.key_handoff.then(|| {
            KeyHandoff::new(
                runtime.clone(),
                status.clone(),
                assistant.clone(),
                HandoffPolicy::from(upgrade),
            )
        });

        let images = ImageFetcher::new(
            runtime.clone(),
            downloader,
            config.download.temp_dir.clone(),
            upgrade.image_fetch_timeout,
            config.node.prefers_mirror(),
        );

        Self {
            oracle,
            runtime,
            status,
            store,
            images,
            handoff,
            node: config.node.clone(),
            assistant,
            sgx,
            pinned: upgrade.new_version.clone().filter(AuthorizedProgram::is_pinned),
            verify_interval: upgrade.verify_interval,
            verify_attempts: upgrade.verify_attempts,
            assist_after: upgrade.unreachable_cycles_before_assist,
            counters: RetryCounters::default(),
            session: UpgradeSession::default(),
            quarantined: None,
        }
    }

    /// Image the node container is currently started from.
    pub fn node_image(&self) -> &str {
        &self.node.image
    }

    pub fn counters(&self) -> &RetryCounters {
        &self.counters
    }

    /// State of the last cycle.
    pub fn session(&self) -> &UpgradeSession {
        &self.session
    }

    /// Image rejected for running an unauthorized enclave, if any.
    pub fn quarantined(&self) -> Option<&str> {
        self.quarantined.as_deref()
    }

    /// Starts the node container unless it already runs.
    ///
    /// Refuses to start anything once an image has been quarantined.
    pub async fn ensure_node_running(&self) -> Result<bool, UpgradeError> {
        if self.runtime.is_running(&self.node.container).await? {
            return Ok(false);
        }

        if let Some(image) = &self.quarantined {
            return Err(UpgradeError::Quarantined {
                image: image.clone(),
            });
        }

        info!(image = %self.node.image, "Starting storage node");
        self.runtime.start(&self.node_spec(&self.node.image)).await?;
        Ok(true)
    }

    /// Runs one full cycle.
    ///
    /// Cancellation is honoured until the old instance is stopped; from there
    /// on the cycle runs to completion.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        self.session = UpgradeSession::default();

        let span = info_span!("upgrade_cycle", image = %self.node.image);
        let result = self.cycle(cancel).instrument(span).await;

        let session = &self.session;
        let metrics = UpgradeMetrics::global();

        match &result {
            Ok(UpgradeOutcome::NoUpgradeNeeded) => {
                metrics.record_cycle(CycleOutcome::NoUpgradeNeeded);
                debug!("No upgrade needed");
            }
            Ok(UpgradeOutcome::Deferred) => {
                metrics.record_cycle(CycleOutcome::Deferred);
            }
            Ok(UpgradeOutcome::Upgraded { from, to, .. }) => {
                metrics.record_cycle(CycleOutcome::Upgraded);
                info!(%from, %to, "Storage node upgraded");
            }
            Err(e) => {
                metrics.record_cycle(CycleOutcome::Failed);
                if e.needs_operator() {
                    error!(phase = ?session.phase, "Upgrade failed, operator action required: {e}");
                } else {
                    warn!(phase = ?session.phase, "Upgrade cycle failed: {e}");
                }
            }
        }

        metrics.phase.set(Phase::Idle.index());
        result
    }

    fn enter(&mut self, phase: Phase) {
        debug!(?phase, "Entering phase");
        self.session.phase = phase;
        UpgradeMetrics::global().phase.set(phase.index());
    }

    fn node_spec(&self, image: &str) -> ContainerSpec {
        ContainerSpec::node(&self.node, image, self.sgx)
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<UpgradeOutcome, UpgradeError> {
        self.enter(Phase::CheckingLocalVersion);

        let Some(local) = self.check_local_version().await? else {
            return Ok(UpgradeOutcome::Deferred);
        };
        self.session.local = Some(local.clone());

        self.enter(Phase::QueryingLedger);

        let ledger = tokio::select! {
            () = cancel.cancelled() => return Err(UpgradeError::Cancelled),
            program = self.oracle.authorized_program() => program,
        };

        let ledger = match ledger {
            Ok(program) => Some(program),
            Err(OracleError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        self.enter(Phase::ValidatingAuthorization);

        let Some(target) = self.select_target(ledger).await? else {
            return Ok(UpgradeOutcome::NoUpgradeNeeded);
        };
        self.session.target = Some(target.clone());

        self.enter(Phase::ComparingVersions);

        if local.enclave_id == target.enclave_id {
            return Ok(UpgradeOutcome::NoUpgradeNeeded);
        }

        let local_version = parse_version("local", &local.version)?;
        let target_version = parse_version("target", &target.version)?;

        if local_version >= target_version {
            debug!(local = %local_version, target = %target_version, "Running version is current");
            return Ok(UpgradeOutcome::NoUpgradeNeeded);
        }

        info!(local = %local_version, target = %target_version, enclave = %target.enclave_id, "Upgrade authorized");

        self.enter(Phase::FetchingImage);

        let fetched = self.images.fetch(&target, cancel).await?;
        self.session.fetched = Some(fetched.clone());

        self.enter(Phase::SwappingContainer);

        let previous = self.node.image.clone();
        self.swap(&fetched, cancel).await?;

        self.enter(Phase::AwaitingKeyHandoff);

        if let Some(handoff) = &self.handoff {
            handoff
                .complete(&CancellationToken::new())
                .await
                .map_err(|source| UpgradeError::HandoffIncomplete { source })?;
        }

        self.enter(Phase::VerifyingNewInstance);

        let to = match self.verify(&target).await {
            Ok(to) => to,
            Err(e @ UpgradeError::IdentityMismatch { .. }) => {
                self.quarantine(previous);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        Ok(UpgradeOutcome::Upgraded {
            from: local,
            to,
            source: fetched.source,
        })
    }

    /// Returns the running instance's identity, or `None` when the cycle
    /// has to be deferred.
    async fn check_local_version(&mut self) -> Result<Option<NodeIdentity>, UpgradeError> {
        if self.ensure_node_running().await? {
            return Ok(None);
        }

        match self.status.version(Service::Node).await {
            Ok(local) => {
                self.counters.unreachable_cycles = 0;
                UpgradeMetrics::global().unreachable_cycles.set(0);
                Ok(Some(local))
            }
            Err(e) => {
                self.counters.unreachable_cycles += 1;
                let cycles = self.counters.unreachable_cycles;

                UpgradeMetrics::global().unreachable_cycles.set(i64::from(cycles));
                warn!(cycles, "Storage node status unreachable: {e}");

                // A node stuck waiting for its key gets the assistant
                if cycles > self.assist_after {
                    info!(cycles, "Starting assistant for an unresponsive node");
                    self.counters = RetryCounters::default();

                    self.runtime.stop(&self.assistant.name).await?;
                    self.runtime.remove(&self.assistant.name).await?;
                    self.runtime.start(&self.assistant).await?;
                }

                Ok(None)
            }
        }
    }

    /// Picks the signed program to upgrade to, if any.
    ///
    /// Nothing is adopted while the ledger has no program. The pinned
    /// override wins only when it is newer than the ledger's program and
    /// carries a valid committee signature itself.
    async fn select_target(
        &self,
        ledger: Option<AuthorizedProgram>,
    ) -> Result<Option<AuthorizedProgram>, UpgradeError> {
        let Some(ledger) = ledger.filter(AuthorizedProgram::is_pinned) else {
            return Ok(None);
        };

        if let Some(pinned) = &self.pinned {
            if self.pinned_supersedes(pinned, &ledger).await {
                info!(version = %pinned.version, "Using pinned program");
                return Ok(Some(pinned.clone()));
            }
        }

        if self.oracle.verify_enclave_authorization(&ledger.enclave_id).await {
            Ok(Some(ledger))
        } else {
            warn!(
                version = %ledger.version,
                enclave = %ledger.enclave_id,
                "Authorized program carries no valid committee signature, ignoring it"
            );
            Ok(None)
        }
    }

    async fn pinned_supersedes(
        &self,
        pinned: &AuthorizedProgram,
        ledger: &AuthorizedProgram,
    ) -> bool {
        let pinned_version = match pinned.parsed_version() {
            Ok(version) => version,
            Err(e) => {
                warn!("Ignoring pinned program: {e}");
                return false;
            }
        };

        match ledger.parsed_version() {
            Ok(ledger_version) if pinned_version > ledger_version => {}
            _ => return false,
        }

        if self.oracle.verify_enclave_authorization(&pinned.enclave_id).await {
            true
        } else {
            warn!(
                version = %pinned.version,
                enclave = %pinned.enclave_id,
                "Pinned program carries no valid committee signature, ignoring it"
            );
            false
        }
    }

    /// Replaces the running instance with one started from the fetched image.
    async fn swap(
        &mut self,
        fetched: &FetchedImage,
        cancel: &CancellationToken,
    ) -> Result<(), UpgradeError> {
        if let Some(handoff) = &self.handoff {
            handoff.prepare(cancel).await?;
        }

        let old_image = self.node.image.clone();
        let name = self.node.container.clone();

        if let Err(e) = self.runtime.stop(&name).await {
            self.abort_handoff().await;
            return Err(e.into());
        }

        if let Err(e) = self.runtime.remove(&name).await {
            self.restore(&old_image).await;
            self.abort_handoff().await;
            return Err(e.into());
        }

        info!(old = %old_image, new = %fetched.reference, "Old instance removed");

        if let Err(source) = self.runtime.start(&self.node_spec(&fetched.reference)).await {
            error!("New instance failed to start: {source}");

            if let Err(e) = self.runtime.remove(&name).await {
                warn!("Failed to remove new instance: {e}");
            }

            self.abort_handoff().await;

            return match self.runtime.start(&self.node_spec(&old_image)).await {
                Ok(()) => Err(UpgradeError::RolledBack { source }),
                Err(e) => {
                    error!("Failed to restart previous instance: {e}");
                    Err(e.into())
                }
            };
        }

        self.node.image = fetched.reference.clone();
        self.store.persist(&fetched.reference)?;

        Ok(())
    }

    /// Points the node back at `previous` and keeps the rejected image from
    /// being started again.
    fn quarantine(&mut self, previous: String) {
        let rejected = std::mem::replace(&mut self.node.image, previous);

        if let Err(e) = self.store.persist(&self.node.image) {
            error!("Failed to restore the previous node image: {e}");
        }

        error!(image = %rejected, "Image quarantined, node stays down until the daemon is restarted");
        self.quarantined = Some(rejected);
    }

    async fn restore(&self, image: &str) {
        if let Err(e) = self.runtime.start(&self.node_spec(image)).await {
            error!("Failed to restart previous instance: {e}");
        }
    }

    async fn abort_handoff(&self) {
        if let Some(handoff) = &self.handoff {
            handoff.abort().await;
        }
    }

    /// Polls the new instance until it reports its identity, which must match
    /// the target exactly.
    async fn verify(&self, target: &AuthorizedProgram) -> Result<NodeIdentity, UpgradeError> {
        for attempt in 1..=self.verify_attempts {
            match self.status.version(Service::Node).await {
                Ok(found) if found.version != target.version => {
                    return Err(UpgradeError::VersionMismatch {
                        expected: target.version.clone(),
                        found: found.version,
                    });
                }
                Ok(found) if found.enclave_id != target.enclave_id => {
                    error!(
                        expected = %target.enclave_id,
                        found = %found.enclave_id,
                        "New instance runs an unauthorized enclave, stopping it"
                    );

                    if let Err(e) = self.runtime.stop(&self.node.container).await {
                        error!("Failed to stop new instance: {e}");
                    }

                    return Err(UpgradeError::IdentityMismatch {
                        expected: target.enclave_id.clone(),
                        found: found.enclave_id,
                    });
                }
                Ok(found) => return Ok(found),
                Err(e) => debug!(attempt, "New instance not answering yet: {e}"),
            }

            tokio::time::sleep(self.verify_interval).await;
        }

        Err(UpgradeError::VerificationTimeout {
            attempts: self.verify_attempts,
        })
    }
}

fn parse_version(which: &'static str, version: &str) -> Result<ProgramVersion, UpgradeError> {
    version
        .parse()
        .map_err(|source| UpgradeError::InvalidVersion { which, source })
}
