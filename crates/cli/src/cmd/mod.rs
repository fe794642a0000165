use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::info;

use dcmanager_config::{ChainConfig, Config, DownloadConfig};
use dcmanager_network::{ContentFetcher, SessionConfig};
use dcmanager_oracle::{CommitteeKey, JsonRpcConnector, LedgerOracle, PeerResolver};
use dcmanager_upgrade::HttpStatusClient;

pub mod daemon;
pub mod get;
pub mod init;
pub mod service;
pub mod status;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger-backed oracle whose sync waits end when `cancel` fires.
pub fn build_oracle(chain: &ChainConfig, cancel: &CancellationToken) -> Result<Arc<LedgerOracle>> {
    let committee = CommitteeKey::from_multibase(&chain.committee_key)
        .wrap_err("Invalid committee public key in configuration")?;

    let connector = JsonRpcConnector::new(&chain.rpc_url, chain.request_timeout);

    let oracle = LedgerOracle::new(Arc::new(connector), committee)
        .with_sync_poll_interval(chain.sync_poll_interval)
        .with_cancellation(cancel.clone());

    Ok(Arc::new(oracle))
}

pub fn build_fetcher(oracle: Arc<LedgerOracle>, download: &DownloadConfig) -> ContentFetcher {
    let session = SessionConfig {
        listen_addr: download.listen_addr.clone(),
        enable_mdns: download.mdns,
        bootstrap_timeout: download.bootstrap_timeout,
        request_timeout: download.request_timeout,
        ..SessionConfig::default()
    };

    ContentFetcher::new(PeerResolver::new(oracle), session)
}

pub fn build_status_client(config: &Config) -> Result<HttpStatusClient> {
    HttpStatusClient::new(
        &config.node.status_host,
        config.node.status_port,
        config.upgrade.assistant_port,
        STATUS_TIMEOUT,
    )
    .wrap_err("Failed to set up status client")
}

/// Cancels the returned token on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
                cancel.cancel();
            }
        }
    });

    cancel
}
