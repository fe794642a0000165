use std::sync::Arc;

use tracing::debug;

use dcmanager_types::{ContentId, PeerEndpoint};

use crate::{OracleError, TrustOracle};

/// Peers to contact for one content object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Size recorded on the ledger, when the object has a storage record
    pub size: Option<u64>,

    /// Providers first, then trusted anchors, one entry per peer
    pub peers: Vec<PeerEndpoint>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Combines the providers the oracle reports for an identifier with the
/// trusted anchor peers into a ranked, deduplicated peer list.
#[derive(Clone)]
pub struct PeerResolver {
    oracle: Arc<dyn TrustOracle>,
}

impl PeerResolver {
    pub fn new(oracle: Arc<dyn TrustOracle>) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &Arc<dyn TrustOracle> {
        &self.oracle
    }

    /// A missing storage record is not an error: the anchors may still
    /// reach the object through the DHT.
    pub async fn resolve(&self, cid: &ContentId) -> Result<Resolution, OracleError> {
        let (size, providers) = match self.oracle.resolve_providers(cid).await {
            Ok(providers) => (Some(providers.size), providers.endpoints),
            Err(OracleError::NotFound(_)) => {
                debug!(%cid, "No storage record on the ledger");
                (None, Vec::new())
            }
            Err(e) => return Err(e),
        };

        let anchors = self.oracle.trusted_bootstrap_peers().await?;

        let mut peers: Vec<PeerEndpoint> = Vec::with_capacity(providers.len() + anchors.len());
        for endpoint in providers.into_iter().chain(anchors) {
            if !peers.iter_mut().any(|known| known.merge(&endpoint)) {
                peers.push(endpoint);
            }
        }

        Ok(Resolution { size, peers })
    }
}
