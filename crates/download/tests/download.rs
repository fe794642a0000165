use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use dcmanager_download::{
    download, DownloadError, DownloadOptions, ProgressSink, SymmetricKey, HEADER_LEN, MAGIC,
};
use dcmanager_network::{
    ContentFetcher, ContentServer, FetchError, Keypair, MemoryStore, SessionConfig,
};
use dcmanager_oracle::{OracleError, PeerResolver, Providers, TrustOracle};
use dcmanager_types::{
    AuthorizedProgram, ContentId, DirectoryEntry, DirectoryListing, EntryKind, PeerEndpoint,
    TransmitStatus,
};

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::builder()
        .parse("info,dcmanager_download=debug")
        .unwrap();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(TransmitStatus, u64)>>);

impl ProgressSink for Recorder {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        self.0.lock().unwrap().push((status, bytes));
    }
}

impl Recorder {
    fn reports(&self) -> Vec<(TransmitStatus, u64)> {
        self.0.lock().unwrap().clone()
    }
}

struct StaticOracle {
    providers: Vec<PeerEndpoint>,
}

#[async_trait]
impl TrustOracle for StaticOracle {
    async fn resolve_providers(&self, _cid: &ContentId) -> Result<Providers, OracleError> {
        Ok(Providers {
            size: 0,
            endpoints: self.providers.clone(),
        })
    }

    async fn trusted_bootstrap_peers(&self) -> Result<Vec<PeerEndpoint>, OracleError> {
        Ok(Vec::new())
    }

    async fn authorized_program(&self) -> Result<AuthorizedProgram, OracleError> {
        Err(OracleError::NotFound("authorized program".to_string()))
    }

    async fn verify_enclave_authorization(&self, _enclave_id: &str) -> bool {
        false
    }
}

async fn server(store: Arc<MemoryStore>) -> ContentServer {
    ContentServer::spawn(
        Keypair::generate_ed25519(),
        "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
        store,
    )
    .await
    .unwrap()
}

fn fetcher(servers: &[&ContentServer]) -> ContentFetcher {
    let oracle = StaticOracle {
        providers: servers.iter().map(|s| s.endpoint()).collect(),
    };

    let config = SessionConfig {
        listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
        enable_mdns: false,
        bootstrap_timeout: Duration::from_secs(10),
        request_timeout: Duration::from_secs(10),
        idle_connection_timeout: Duration::from_secs(30),
    };

    ContentFetcher::new(PeerResolver::new(Arc::new(oracle)), config)
}

/// Reports are cumulative, non-decreasing, and closed by exactly one
/// terminal report with the given status.
fn assert_single_terminal(reports: &[(TransmitStatus, u64)], end: (TransmitStatus, u64)) {
    let (last, rest) = reports.split_last().unwrap();
    assert_eq!(*last, end);
    assert!(rest.iter().all(|(s, _)| *s == TransmitStatus::Transmitting));
    assert!(reports.windows(2).all(|w| w[0].1 <= w[1].1));
}

fn fixture(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_from_two_providers() {
    init_logging();

    let data = fixture(1_048_576);

    let first = server(Arc::new(MemoryStore::new())).await;
    let store = Arc::new(MemoryStore::new());
    let cid = store.insert_file(data.clone());
    let second = server(store).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("fixture.bin");
    let progress = Recorder::default();

    let summary = download(
        &fetcher(&[&first, &second]),
        &cid,
        &dest,
        &DownloadOptions {
            timeout: None,
            ..Default::default()
        },
        &progress,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.kind, EntryKind::File);
    assert_eq!(summary.bytes, 1_048_576);

    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(written.len(), 1_048_576);
    assert!(written == data);

    assert_single_terminal(&progress.reports(), (TransmitStatus::Success, 1_048_576));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encrypted_file_with_storage_header() {
    init_logging();

    let key = SymmetricKey::generate();
    let data = fixture(100_000);

    let mut stored = MAGIC.to_vec();
    stored.resize(HEADER_LEN, 0x11);
    stored.extend_from_slice(&key.encrypt(&data).unwrap());

    let store = Arc::new(MemoryStore::new());
    let cid = store.insert_file(stored);
    let holder = server(store).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("secret.bin");

    let options = DownloadOptions {
        secret: Some(key.to_secret()),
        ..Default::default()
    };

    download(
        &fetcher(&[&holder]),
        &cid,
        &dest,
        &options,
        &Recorder::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(tokio::fs::read(&dest).await.unwrap() == data);

    let wrong = DownloadOptions {
        secret: Some(SymmetricKey::generate().to_secret()),
        ..Default::default()
    };

    let err = download(
        &fetcher(&[&holder]),
        &cid,
        &dir.path().join("garbled.bin"),
        &wrong,
        &Recorder::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DownloadError::DecryptionFailed { unit: 0 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_tree_is_mirrored() {
    init_logging();

    let store = Arc::new(MemoryStore::new());

    let empty = store.insert_directory(DirectoryListing::default());
    let blob = store.insert_file(fixture(5000));
    let sub = store.insert_directory(DirectoryListing::new(vec![
        DirectoryEntry::file("b.bin", blob),
        DirectoryEntry::directory("deeper", empty),
    ]));
    let note = store.insert_file(Bytes::from_static(b"note"));
    let root = store.insert_directory(DirectoryListing::new(vec![
        DirectoryEntry::file("a.txt", note),
        DirectoryEntry::directory("sub", sub),
    ]));

    let holder = server(store).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tree");
    let progress = Recorder::default();

    let summary = download(
        &fetcher(&[&holder]),
        &root,
        &dest,
        &DownloadOptions::default(),
        &progress,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.kind, EntryKind::Directory);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.directories, 2);
    assert_eq!(summary.bytes, 5004);

    // One count for the whole tree, not one per file
    let reports = progress.reports();
    assert_single_terminal(&reports, (TransmitStatus::Success, 5004));
    assert_eq!(reports.first(), Some(&(TransmitStatus::Transmitting, 4)));

    assert_eq!(tokio::fs::read(dest.join("a.txt")).await.unwrap(), b"note");
    assert_eq!(
        tokio::fs::read(dest.join("sub/b.bin")).await.unwrap(),
        fixture(5000)
    );
    assert!(dest.join("sub/deeper").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_entry_fails_whole_tree() {
    init_logging();

    let store = Arc::new(MemoryStore::new());
    let note = store.insert_file(Bytes::from_static(b"note"));
    let root = store.insert_directory(DirectoryListing::new(vec![
        DirectoryEntry::file("a.txt", note),
        DirectoryEntry::file("b.txt", ContentId::of(b"never stored")),
    ]));
    let holder = server(store).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tree");
    let progress = Recorder::default();

    let err = download(
        &fetcher(&[&holder]),
        &root,
        &dest,
        &DownloadOptions::default(),
        &progress,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_unavailable());

    // The first file stays on disk but the transfer as a whole failed
    assert_eq!(tokio::fs::read(dest.join("a.txt")).await.unwrap(), b"note");
    assert!(!dest.join("b.txt").exists());

    let reports = progress.reports();
    assert_single_terminal(&reports, (TransmitStatus::Failed, 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escaping_entry_name_aborts_walk() {
    init_logging();

    let store = Arc::new(MemoryStore::new());
    let payload = store.insert_file(Bytes::from_static(b"payload"));
    let root = store.insert_directory(DirectoryListing::new(vec![
        DirectoryEntry::file("../escape", payload),
    ]));
    let holder = server(store).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tree");
    let progress = Recorder::default();

    let err = download(
        &fetcher(&[&holder]),
        &root,
        &dest,
        &DownloadOptions::default(),
        &progress,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DownloadError::InvalidEntryName(_)));
    assert!(!dir.path().join("escape").exists());
    assert_eq!(progress.reports(), vec![(TransmitStatus::Failed, 0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_object_reports_failure() {
    init_logging();

    let holder = server(Arc::new(MemoryStore::new())).await;

    let dir = tempfile::tempdir().unwrap();
    let progress = Recorder::default();

    let err = download(
        &fetcher(&[&holder]),
        &ContentId::of(b"nowhere"),
        &dir.path().join("nothing"),
        &DownloadOptions::default(),
        &progress,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_unavailable());
    assert!(matches!(
        err,
        DownloadError::Fetch(FetchError::Unavailable { .. })
    ));
    assert_eq!(progress.reports(), vec![(TransmitStatus::Failed, 0)]);
}
