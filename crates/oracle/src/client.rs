use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dcmanager_types::{AuthorizedProgram, ContentId, PeerEndpoint};

use crate::{CommitteeKey, LedgerConnector, LedgerRpc, OracleError, Providers, TrustOracle};

/// [`TrustOracle`] backed by the ledger.
///
/// The connection is opened on first use and shared by every subsequent call
/// until [`LedgerOracle::reset`] drops it.
pub struct LedgerOracle {
    connector: Arc<dyn LedgerConnector>,
    handle: Mutex<Option<Arc<dyn LedgerRpc>>>,
    committee: CommitteeKey,
    sync_poll_interval: Duration,
    cancel: CancellationToken,
}

impl LedgerOracle {
    pub fn new(connector: Arc<dyn LedgerConnector>, committee: CommitteeKey) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
            committee,
            sync_poll_interval: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }

    /// Cancelling the token aborts every pending and future sync wait with
    /// [`OracleError::SyncPending`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn committee(&self) -> &CommitteeKey {
        &self.committee
    }

    /// Returns the shared ledger handle, connecting if there is none yet.
    pub async fn ledger(&self) -> Result<Arc<dyn LedgerRpc>, OracleError> {
        let mut handle = self.handle.lock().await;

        if let Some(ledger) = handle.as_ref() {
            return Ok(Arc::clone(ledger));
        }

        debug!("Connecting to the ledger");
        let ledger = self.connector.connect().await?;
        *handle = Some(Arc::clone(&ledger));

        Ok(ledger)
    }

    /// Drops the shared handle; the next call reconnects.
    pub async fn reset(&self) {
        if self.handle.lock().await.take().is_some() {
            info!("Ledger connection reset");
        }
    }

    async fn synced_ledger(&self) -> Result<Arc<dyn LedgerRpc>, OracleError> {
        let ledger = self.ledger().await?;
        self.wait_for_sync(ledger.as_ref()).await?;
        Ok(ledger)
    }

    async fn wait_for_sync(&self, ledger: &dyn LedgerRpc) -> Result<(), OracleError> {
        let mut announced = false;

        loop {
            match ledger.is_syncing().await {
                Ok(false) => {
                    if announced {
                        info!("Ledger sync completed");
                    }
                    return Ok(());
                }
                Ok(true) if !announced => {
                    info!("Waiting for the ledger to finish syncing");
                    announced = true;
                }
                Ok(true) => {}
                Err(e) => debug!("Ledger health check failed: {e}"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(OracleError::SyncPending),
                _ = tokio::time::sleep(self.sync_poll_interval) => {}
            }
        }
    }

    /// Resolves a peer entry that is either a full multiaddr or a bare peer id
    /// looked up in the ledger's peer directory.
    async fn resolve_peer(&self, ledger: &dyn LedgerRpc, entry: &str) -> Option<PeerEndpoint> {
        let address = if entry.contains("/ip") {
            entry.to_string()
        } else {
            match ledger.peer_address(entry).await {
                Ok(Some(address)) => address,
                Ok(None) => {
                    debug!(peer = %entry, "Peer has no registered address");
                    return None;
                }
                Err(e) => {
                    debug!(peer = %entry, "Failed to look up peer address: {e}");
                    return None;
                }
            }
        };

        match address.parse::<PeerEndpoint>() {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(peer = %entry, %address, "Skipping peer with invalid address: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl TrustOracle for LedgerOracle {
    async fn resolve_providers(&self, cid: &ContentId) -> Result<Providers, OracleError> {
        let ledger = self.synced_ledger().await?;

        let record = ledger
            .file_info(cid)
            .await?
            .ok_or_else(|| OracleError::NotFound(cid.to_string()))?;

        let mut endpoints = Vec::with_capacity(record.peers.len());
        for peer in &record.peers {
            if let Some(endpoint) = self.resolve_peer(ledger.as_ref(), peer).await {
                endpoints.push(endpoint);
            }
        }

        debug!(%cid, size = record.size, providers = endpoints.len(), "Resolved providers");

        Ok(Providers {
            size: record.size,
            endpoints,
        })
    }

    async fn trusted_bootstrap_peers(&self) -> Result<Vec<PeerEndpoint>, OracleError> {
        let ledger = self.synced_ledger().await?;
        let entries = ledger.trusted_storage_nodes().await?;

        let mut peers = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Some(endpoint) = self.resolve_peer(ledger.as_ref(), entry).await {
                peers.push(endpoint);
            }
        }

        Ok(peers)
    }

    async fn authorized_program(&self) -> Result<AuthorizedProgram, OracleError> {
        self.synced_ledger()
            .await?
            .program()
            .await?
            .ok_or_else(|| OracleError::NotFound("authorized program".to_string()))
    }

    async fn verify_enclave_authorization(&self, enclave_id: &str) -> bool {
        let authorizations = match self.synced_ledger().await {
            Ok(ledger) => ledger.enclave_ids().await,
            Err(e) => Err(e),
        };

        match authorizations {
            Ok(authorizations) => authorizations
                .iter()
                .filter(|auth| auth.enclave_id == enclave_id)
                .any(|auth| self.committee.verify(auth)),

            Err(e) => {
                warn!(%enclave_id, "Failed to fetch enclave authorizations: {e}");
                false
            }
        }
    }
}
