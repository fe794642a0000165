use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dcmanager_types::{AuthorizedProgram, ContentId, EnclaveAuthorization};

use crate::OracleError;

/// Storage record of a content object on the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Size of the object in bytes
    pub size: u64,

    /// Peer ids of the storage nodes holding a copy
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Raw ledger queries. Each call maps to one storage lookup; `None` means the
/// ledger has no entry for the key.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Whether the ledger node is still catching up with the network
    async fn is_syncing(&self) -> Result<bool, OracleError>;

    async fn file_info(&self, cid: &ContentId) -> Result<Option<FileRecord>, OracleError>;

    /// Registered address of a storage node, as a full `/p2p/` multiaddr
    async fn peer_address(&self, peer_id: &str) -> Result<Option<String>, OracleError>;

    /// Trusted storage nodes, either full multiaddrs or bare peer ids
    async fn trusted_storage_nodes(&self) -> Result<Vec<String>, OracleError>;

    async fn program(&self) -> Result<Option<AuthorizedProgram>, OracleError>;

    async fn enclave_ids(&self) -> Result<Vec<EnclaveAuthorization>, OracleError>;
}

/// Opens a ledger connection.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LedgerRpc>, OracleError>;
}
