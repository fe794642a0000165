use serde::{Deserialize, Serialize};

use crate::{ContentId, ParseVersionError, ProgramVersion};

/// Software identity currently sanctioned by the ledger, or pinned by the operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedProgram {
    /// Program version, e.g. `1.2.1`
    pub version: String,

    /// Enclave identity of the trusted-execution build
    #[serde(alias = "enclaveId")]
    pub enclave_id: String,

    /// Image reference on the primary registry
    #[serde(default, alias = "originUrl")]
    pub origin_url: String,

    /// Image reference on the mirror registry
    #[serde(default, alias = "mirrorUrl")]
    pub mirror_url: String,

    /// Identifiers of the image tarball on the content network, tried in order
    #[serde(default, alias = "mirrCids")]
    pub content_ids: Vec<ContentId>,
}

impl AuthorizedProgram {
    pub fn parsed_version(&self) -> Result<ProgramVersion, ParseVersionError> {
        self.version.parse()
    }

    /// An override is only usable once both its version and enclave are set.
    pub fn is_pinned(&self) -> bool {
        !self.version.trim().is_empty() && !self.enclave_id.trim().is_empty()
    }
}

/// Committee signature over an enclave identity, as published on the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveAuthorization {
    #[serde(default, alias = "blockHeight")]
    pub block_height: u32,

    #[serde(alias = "enclaveId")]
    pub enclave_id: String,

    /// Multibase-encoded ed25519 signature over the enclave id bytes
    pub signature: String,
}
