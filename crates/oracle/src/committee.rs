use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::trace;

use dcmanager_types::EnclaveAuthorization;

use crate::OracleError;

/// Public key of the committee that signs authorized enclave identities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeKey(VerifyingKey);

impl CommitteeKey {
    pub fn new(key: VerifyingKey) -> Self {
        Self(key)
    }

    /// Decodes a multibase-encoded raw ed25519 public key.
    pub fn from_multibase(encoded: &str) -> Result<Self, OracleError> {
        let (_, bytes) = multibase::decode(encoded.trim())
            .map_err(|e| OracleError::InvalidCommitteeKey(e.to_string()))?;

        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            OracleError::InvalidCommitteeKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;

        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| OracleError::InvalidCommitteeKey(e.to_string()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    /// Checks the multibase signature of an authorization over its enclave id bytes.
    pub fn verify(&self, authorization: &EnclaveAuthorization) -> bool {
        let Ok((_, signature)) = multibase::decode(authorization.signature.trim()) else {
            trace!(enclave_id = %authorization.enclave_id, "Signature is not multibase");
            return false;
        };

        let Ok(signature) = Signature::from_slice(&signature) else {
            trace!(enclave_id = %authorization.enclave_id, "Signature has the wrong length");
            return false;
        };

        self.0
            .verify(authorization.enclave_id.as_bytes(), &signature)
            .is_ok()
    }
}
