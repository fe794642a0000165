use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dcmanager_config::{Config, ConfigFileError};
use dcmanager_download::DownloadError;
use dcmanager_network::FetchError;
use dcmanager_oracle::{OracleError, Providers, TrustOracle};
use dcmanager_types::{AuthorizedProgram, ContentId, PeerEndpoint};
use dcmanager_upgrade::{
    Collaborators, ContainerError, ContainerRuntime, ContainerSpec, ContentDownloader,
    HandoffError, HandoffFlag, ImageSource, NodeIdentity, NodeImageStore, Phase, Scheduler,
    Service, ServiceFlag, Sgx, StatusError, StatusSurface, UpgradeCoordinator, UpgradeError,
    UpgradeOutcome,
};

const NODE: &str = "dcstorage";
const ASSISTANT: &str = "dcupgrade";
const OLD_IMAGE: &str = "ghcr.io/dcnetio/dcstorage:1.2.0";
const NEW_IMAGE: &str = "ghcr.io/dcnetio/dcstorage:1.2.1";
const MIRROR_IMAGE: &str = "mirror.example/dcstorage:1.2.1";

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::builder()
        .parse("info,dcmanager_upgrade=debug")
        .unwrap();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct World {
    /// name -> (image, running)
    containers: HashMap<String, (String, bool)>,
    /// image -> identity the node reports when started from it
    identities: HashMap<String, NodeIdentity>,
    node_status_down: bool,
    failing_pulls: HashSet<String>,
    failing_starts: HashSet<String>,
    /// Polls after which a flag turns true; absent means never
    flag_after: HashMap<&'static str, u32>,
    flag_polls: HashMap<&'static str, u32>,
    events: Vec<String>,
}

impl World {
    fn running(&self, name: &str) -> Option<&str> {
        match self.containers.get(name) {
            Some((image, true)) => Some(image),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
struct Host(Arc<Mutex<World>>);

impl Host {
    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.0.lock().unwrap()
    }

    fn with_node(self, image: &str, identity: &str) -> Self {
        {
            let mut world = self.world();
            world
                .containers
                .insert(NODE.to_string(), (image.to_string(), true));
            world
                .identities
                .insert(image.to_string(), identity.parse().unwrap());
        }
        self
    }

    fn identity(self, image: &str, identity: &str) -> Self {
        self.world()
            .identities
            .insert(image.to_string(), identity.parse().unwrap());
        self
    }

    fn flag_after(self, flag: HandoffFlag, polls: u32) -> Self {
        self.world().flag_after.insert(flag.path(), polls);
        self
    }

    fn events(&self) -> Vec<String> {
        self.world().events.clone()
    }

    fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("no {event:?} in {:?}", self.events()))
    }
}

fn failed(command: &str) -> ContainerError {
    ContainerError::Failed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ContainerRuntime for Host {
    async fn start(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let mut world = self.world();
        world.events.push(format!("start {} {}", spec.name, spec.image));

        if world.failing_starts.contains(&spec.image) {
            return Err(failed("start"));
        }

        world
            .containers
            .insert(spec.name.clone(), (spec.image.clone(), true));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        let mut world = self.world();
        world.events.push(format!("stop {name}"));

        if let Some((_, running)) = world.containers.get_mut(name) {
            *running = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        let mut world = self.world();
        world.events.push(format!("remove {name}"));
        world.containers.remove(name);
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        Ok(self.world().running(name).is_some())
    }

    async fn load_image(&self, tarball: &Path) -> Result<(), ContainerError> {
        assert!(tarball.exists());
        let name = tarball.file_name().unwrap().to_string_lossy().into_owned();
        self.world().events.push(format!("load {name}"));
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), ContainerError> {
        let mut world = self.world();
        world.events.push(format!("pull {reference}"));

        if world.failing_pulls.contains(reference) {
            return Err(failed("pull"));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusSurface for Host {
    async fn version(&self, service: Service) -> Result<NodeIdentity, StatusError> {
        let world = self.world();
        let name = match service {
            Service::Node => NODE,
            Service::Assistant => ASSISTANT,
        };

        match world.running(name) {
            Some(_) if service == Service::Node && world.node_status_down => {
                Err(StatusError::Unreachable("connection refused".to_string()))
            }
            Some(image) => world
                .identities
                .get(image)
                .cloned()
                .ok_or_else(|| StatusError::Malformed(String::new())),
            None => Err(StatusError::Unreachable("connection refused".to_string())),
        }
    }

    async fn flag(&self, flag: HandoffFlag) -> Result<bool, StatusError> {
        let mut world = self.world();

        if world.running(ASSISTANT).is_none() {
            return Err(StatusError::Unreachable("connection refused".to_string()));
        }

        let polls = world.flag_polls.entry(flag.path()).or_default();
        *polls += 1;
        let polls = *polls;

        Ok(world
            .flag_after
            .get(flag.path())
            .is_some_and(|after| polls >= *after))
    }
}

#[derive(Default)]
struct Ledger {
    program: Option<AuthorizedProgram>,
    signed: HashSet<String>,
}

#[async_trait]
impl TrustOracle for Ledger {
    async fn resolve_providers(&self, cid: &ContentId) -> Result<Providers, OracleError> {
        Err(OracleError::NotFound(cid.to_string()))
    }

    async fn trusted_bootstrap_peers(&self) -> Result<Vec<PeerEndpoint>, OracleError> {
        Ok(Vec::new())
    }

    async fn authorized_program(&self) -> Result<AuthorizedProgram, OracleError> {
        self.program
            .clone()
            .ok_or_else(|| OracleError::NotFound("authorized program".to_string()))
    }

    async fn verify_enclave_authorization(&self, enclave_id: &str) -> bool {
        self.signed.contains(enclave_id)
    }
}

/// Serves every identifier it holds, and nothing else.
#[derive(Default)]
struct Network {
    holds: HashSet<ContentId>,
    requested: Mutex<Vec<ContentId>>,
}

#[async_trait]
impl ContentDownloader for Network {
    async fn download(
        &self,
        cid: &ContentId,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        self.requested.lock().unwrap().push(*cid);

        if !self.holds.contains(cid) {
            return Err(DownloadError::Fetch(FetchError::Unavailable { cid: *cid }));
        }

        std::fs::write(dest, b"image tarball").unwrap();
        Ok(13)
    }
}

#[derive(Default)]
struct Persisted(Mutex<Vec<String>>);

impl NodeImageStore for Persisted {
    fn persist(&self, image: &str) -> Result<(), ConfigFileError> {
        self.0.lock().unwrap().push(image.to_string());
        Ok(())
    }
}

fn program(version: &str, enclave_id: &str) -> AuthorizedProgram {
    AuthorizedProgram {
        version: version.to_string(),
        enclave_id: enclave_id.to_string(),
        origin_url: NEW_IMAGE.to_string(),
        mirror_url: MIRROR_IMAGE.to_string(),
        content_ids: vec![ContentId::of(b"image v1.2.1")],
    }
}

fn signed_ledger(program: AuthorizedProgram) -> Ledger {
    Ledger {
        signed: HashSet::from([program.enclave_id.clone()]),
        program: Some(program),
    }
}

struct Harness {
    host: Host,
    network: Arc<Network>,
    persisted: Arc<Persisted>,
    coordinator: UpgradeCoordinator,
    staging: tempfile::TempDir,
}

fn harness(host: Host, ledger: Ledger, network: Network, tweak: impl FnOnce(&mut Config)) -> Harness {
    let staging = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.node.image = OLD_IMAGE.to_string();
    config.download.temp_dir = staging.path().to_path_buf();
    tweak(&mut config);

    let network = Arc::new(network);
    let persisted = Arc::new(Persisted::default());

    let coordinator = UpgradeCoordinator::new(
        &config,
        Collaborators {
            oracle: Arc::new(ledger),
            runtime: Arc::new(host.clone()),
            status: Arc::new(host.clone()),
            downloader: network.clone(),
            store: persisted.clone(),
        },
        Sgx::Available,
    );

    Harness {
        host,
        network,
        persisted,
        coordinator,
        staging,
    }
}

fn network_with_image() -> Network {
    Network {
        holds: HashSet::from([ContentId::of(b"image v1.2.1")]),
        ..Default::default()
    }
}

fn ready_host() -> Host {
    Host::default()
        .with_node(OLD_IMAGE, "e-old@1.2.0")
        .identity(NEW_IMAGE, "e-new@1.2.1")
        .flag_after(HandoffFlag::SecretReceived, 3)
        .flag_after(HandoffFlag::SecretDelivered, 5)
}

#[tokio::test(start_paused = true)]
async fn upgrades_to_signed_newer_version() {
    init_logging();

    let mut h = harness(
        ready_host(),
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        UpgradeOutcome::Upgraded {
            from: "e-old@1.2.0".parse().unwrap(),
            to: "e-new@1.2.1".parse().unwrap(),
            source: ImageSource::Network,
        }
    );

    let world = h.host.world();
    assert_eq!(world.running(NODE), Some(NEW_IMAGE));
    assert_eq!(world.running(ASSISTANT), None);
    drop(world);

    // The assistant holds the key before the old instance goes away
    let cid = ContentId::of(b"image v1.2.1");
    assert!(h.host.position(&format!("load {cid}.tar")) < h.host.position("stop dcstorage"));
    assert!(
        h.host.position("start dcupgrade ghcr.io/dcnetio/dcupgrade:latest")
            < h.host.position("stop dcstorage")
    );
    assert!(h.host.position("remove dcstorage") < h.host.position(&format!("start dcstorage {NEW_IMAGE}")));

    assert_eq!(h.coordinator.node_image(), NEW_IMAGE);
    assert_eq!(*h.persisted.0.lock().unwrap(), vec![NEW_IMAGE.to_string()]);
    assert_eq!(h.coordinator.session().phase, Phase::VerifyingNewInstance);

    // The staged tarball is cleaned up
    assert!(!h.staging.path().join(format!("{cid}.tar")).exists());

    // Running again at the target is a no-op
    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, UpgradeOutcome::NoUpgradeNeeded);
}

#[tokio::test(start_paused = true)]
async fn unsigned_target_is_ignored() {
    init_logging();

    let ledger = Ledger {
        program: Some(program("1.2.1", "e-new")),
        signed: HashSet::new(),
    };

    let mut h = harness(ready_host(), ledger, network_with_image(), |_| {});

    for _ in 0..3 {
        let outcome = h
            .coordinator
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::NoUpgradeNeeded);
    }

    assert!(h.network.requested.lock().unwrap().is_empty());
    assert!(h.host.events().is_empty());
    assert_eq!(h.host.world().running(NODE), Some(OLD_IMAGE));
}

#[tokio::test(start_paused = true)]
async fn newer_local_version_is_kept() {
    init_logging();

    let host = ready_host().with_node(OLD_IMAGE, "e-dev@1.3.0");
    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, UpgradeOutcome::NoUpgradeNeeded);
    assert!(h.host.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn signed_pinned_program_newer_than_ledger_wins() {
    init_logging();

    let mut ledger = signed_ledger(program("1.2.1", "e-new"));
    ledger.signed.insert("e-pinned".to_string());

    let pinned = pinned_program("1.2.2", "e-pinned");

    let host = ready_host().identity("ghcr.io/dcnetio/dcstorage:1.2.2", "e-pinned@1.2.2");
    let mut h = harness(host, ledger, Network::default(), |config| {
        config.upgrade.new_version = Some(pinned);
    });

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        UpgradeOutcome::Upgraded { source: ImageSource::Registry, .. }
    ));
    assert_eq!(h.coordinator.node_image(), "ghcr.io/dcnetio/dcstorage:1.2.2");
}

fn pinned_program(version: &str, enclave_id: &str) -> AuthorizedProgram {
    AuthorizedProgram {
        content_ids: Vec::new(),
        origin_url: format!("ghcr.io/dcnetio/dcstorage:{version}"),
        mirror_url: String::new(),
        ..program(version, enclave_id)
    }
}

/// Runs one cycle with `pinned` configured next to a signed 1.2.1 ledger
/// program and expects the ledger program to be adopted.
async fn ledger_program_wins_over(pinned: AuthorizedProgram, pinned_signed: bool) {
    let mut ledger = signed_ledger(program("1.2.1", "e-new"));
    if pinned_signed {
        ledger.signed.insert(pinned.enclave_id.clone());
    }

    let mut h = harness(ready_host(), ledger, network_with_image(), |config| {
        config.upgrade.new_version = Some(pinned);
    });

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        UpgradeOutcome::Upgraded {
            from: "e-old@1.2.0".parse().unwrap(),
            to: "e-new@1.2.1".parse().unwrap(),
            source: ImageSource::Network,
        }
    );
    assert_eq!(h.coordinator.node_image(), NEW_IMAGE);
}

#[tokio::test(start_paused = true)]
async fn malformed_pinned_version_is_ignored() {
    init_logging();
    ledger_program_wins_over(pinned_program("not-a-version", "e-pinned"), true).await;
}

#[tokio::test(start_paused = true)]
async fn pinned_program_not_newer_than_ledger_is_ignored() {
    init_logging();
    ledger_program_wins_over(pinned_program("1.2.1", "e-pinned"), true).await;
    ledger_program_wins_over(pinned_program("1.1.9", "e-pinned"), true).await;
}

#[tokio::test(start_paused = true)]
async fn unsigned_pinned_program_is_ignored() {
    init_logging();
    ledger_program_wins_over(pinned_program("1.2.2", "e-pinned"), false).await;
}

#[tokio::test(start_paused = true)]
async fn pinned_program_needs_a_ledger_program() {
    init_logging();

    let ledger = Ledger {
        program: None,
        signed: HashSet::from(["e-pinned".to_string()]),
    };

    let host = ready_host().identity("ghcr.io/dcnetio/dcstorage:1.2.2", "e-pinned@1.2.2");
    let mut h = harness(host, ledger, Network::default(), |config| {
        config.upgrade.new_version = Some(pinned_program("1.2.2", "e-pinned"));
    });

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, UpgradeOutcome::NoUpgradeNeeded);
    assert!(h.host.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn registry_fallback_follows_region() {
    init_logging();

    let host = ready_host();
    host.world().failing_pulls.insert(MIRROR_IMAGE.to_string());

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        Network::default(),
        |config| config.node.registry_region = "cn".to_string(),
    );

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        UpgradeOutcome::Upgraded { source: ImageSource::Registry, .. }
    ));

    let pulls = h
        .host
        .events()
        .into_iter()
        .filter(|e| e.starts_with("pull "))
        .collect::<Vec<_>>();

    assert_eq!(
        pulls,
        vec![format!("pull {MIRROR_IMAGE}"), format!("pull {NEW_IMAGE}")]
    );
    assert_eq!(h.network.requested.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_image_source_leaves_node_alone() {
    init_logging();

    let host = ready_host();
    {
        let mut world = host.world();
        world.failing_pulls.insert(NEW_IMAGE.to_string());
        world.failing_pulls.insert(MIRROR_IMAGE.to_string());
    }

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        Network::default(),
        |_| {},
    );

    let err = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::ImageUnavailable { .. }));
    assert_eq!(h.host.world().running(NODE), Some(OLD_IMAGE));
    assert_eq!(h.host.world().running(ASSISTANT), None);
}

#[tokio::test(start_paused = true)]
async fn assistant_never_ready_keeps_old_instance() {
    init_logging();

    let host = Host::default()
        .with_node(OLD_IMAGE, "e-old@1.2.0")
        .identity(NEW_IMAGE, "e-new@1.2.1");

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let err = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::Handoff(HandoffError::Timeout {
            flag: HandoffFlag::SecretReceived,
            attempts: 60,
        })
    ));
    assert!(!err.needs_operator());

    let world = h.host.world();
    assert_eq!(world.running(NODE), Some(OLD_IMAGE));
    assert_eq!(world.running(ASSISTANT), None);
}

#[tokio::test(start_paused = true)]
async fn undelivered_key_leaves_exactly_one_instance() {
    init_logging();

    let host = Host::default()
        .with_node(OLD_IMAGE, "e-old@1.2.0")
        .identity(NEW_IMAGE, "e-new@1.2.1")
        .flag_after(HandoffFlag::SecretReceived, 1);

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let started = tokio::time::Instant::now();
    let err = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::HandoffIncomplete {
            source: HandoffError::Timeout {
                flag: HandoffFlag::SecretDelivered,
                attempts: 600,
            }
        }
    ));
    assert!(err.needs_operator());
    assert!(started.elapsed() >= Duration::from_secs(599));

    let world = h.host.world();
    let running = world
        .containers
        .iter()
        .filter(|(name, (_, running))| name.as_str() == NODE && *running)
        .count();

    assert_eq!(running, 1);
    assert_eq!(world.running(NODE), Some(NEW_IMAGE));
    assert_eq!(world.running(ASSISTANT), None);
}

#[tokio::test(start_paused = true)]
async fn failed_start_rolls_back() {
    init_logging();

    let host = ready_host();
    host.world().failing_starts.insert(NEW_IMAGE.to_string());

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let err = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::RolledBack { .. }));
    assert_eq!(h.host.world().running(NODE), Some(OLD_IMAGE));
    assert_eq!(h.host.world().running(ASSISTANT), None);
    assert_eq!(h.coordinator.node_image(), OLD_IMAGE);
    assert!(h.persisted.0.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rogue_enclave_is_stopped() {
    init_logging();

    let host = ready_host().identity(NEW_IMAGE, "e-rogue@1.2.1");
    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let err = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::IdentityMismatch { ref found, .. } if found == "e-rogue"
    ));
    assert_eq!(h.host.world().running(NODE), None);

    // The rejected image is never started again and the configuration
    // points back at the previous one
    assert_eq!(h.coordinator.quarantined(), Some(NEW_IMAGE));
    assert_eq!(h.coordinator.node_image(), OLD_IMAGE);
    assert_eq!(
        *h.persisted.0.lock().unwrap(),
        vec![NEW_IMAGE.to_string(), OLD_IMAGE.to_string()]
    );

    let node_starts = |host: &Host| {
        host.events()
            .iter()
            .filter(|e| e.starts_with("start dcstorage"))
            .count()
    };
    let starts_before = node_starts(&h.host);

    for _ in 0..2 {
        let err = h
            .coordinator
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Quarantined { ref image } if image == NEW_IMAGE));
        assert!(err.needs_operator());
    }

    assert_eq!(node_starts(&h.host), starts_before);
    assert_eq!(h.host.world().running(NODE), None);
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_gets_assistant() {
    init_logging();

    let host = ready_host();
    host.world().node_status_down = true;

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |config| config.upgrade.unreachable_cycles_before_assist = 3,
    );

    for cycle in 1..=3 {
        let outcome = h
            .coordinator
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, UpgradeOutcome::Deferred);
        assert_eq!(h.coordinator.counters().unreachable_cycles, cycle);
    }

    assert_eq!(h.host.world().running(ASSISTANT), None);

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, UpgradeOutcome::Deferred);
    assert_eq!(h.coordinator.counters().unreachable_cycles, 0);
    assert!(h.host.world().running(ASSISTANT).is_some());
}

#[tokio::test(start_paused = true)]
async fn stopped_node_is_started_and_cycle_deferred() {
    init_logging();

    let host = ready_host();
    host.world().containers.clear();

    let mut h = harness(
        host,
        signed_ledger(program("1.2.1", "e-new")),
        network_with_image(),
        |_| {},
    );

    let outcome = h
        .coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, UpgradeOutcome::Deferred);
    assert_eq!(h.host.world().running(NODE), Some(OLD_IMAGE));
}

#[tokio::test(start_paused = true)]
async fn scheduler_honours_service_flag() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let flag = ServiceFlag::new(dir.path().join("desired"));
    let interval = Duration::from_secs(300);

    let mut h = harness(
        ready_host(),
        signed_ledger(program("1.2.0", "e-old")),
        Network::default(),
        |_| {},
    );

    let scheduler = Scheduler::new(interval, flag.clone());

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(interval * 3 + Duration::from_secs(1)).await;
        canceller.cancel();
    });

    scheduler.run(&mut h.coordinator, &cancel).await;
    assert!(h.host.events().is_empty());

    // Cycles are observable through the stopped node being started again
    h.host.world().containers.clear();
    flag.set(true).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(interval + Duration::from_secs(1)).await;
        canceller.cancel();
    });

    scheduler.run(&mut h.coordinator, &cancel).await;
    assert_eq!(h.host.world().running(NODE), Some(OLD_IMAGE));
}
