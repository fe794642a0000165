use async_trait::async_trait;

use dcmanager_types::{AuthorizedProgram, ContentId, PeerEndpoint};

use crate::OracleError;

/// Storage nodes known to hold a content object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Providers {
    pub size: u64,
    pub endpoints: Vec<PeerEndpoint>,
}

/// Trust-anchored source of content providers, bootstrap peers and the
/// currently authorized software identity.
///
/// Every call may wait for the underlying ledger to finish syncing.
#[async_trait]
pub trait TrustOracle: Send + Sync {
    async fn resolve_providers(&self, cid: &ContentId) -> Result<Providers, OracleError>;

    async fn trusted_bootstrap_peers(&self) -> Result<Vec<PeerEndpoint>, OracleError>;

    async fn authorized_program(&self) -> Result<AuthorizedProgram, OracleError>;

    /// Whether the enclave id carries a valid committee signature.
    /// Lookup failures count as unauthorized.
    async fn verify_enclave_authorization(&self, enclave_id: &str) -> bool;
}
