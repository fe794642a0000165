use core::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::DownloadError;

/// Length of the AES-256 key.
pub const KEY_LEN: usize = 32;

/// Length of the nonce stored in front of every encrypted unit.
pub const NONCE_LEN: usize = 12;

/// Bytes an encrypted unit carries on top of its plaintext: the nonce and
/// the GCM authentication tag.
pub const UNIT_OVERHEAD: usize = NONCE_LEN + 16;

/// Key for AES-256-GCM unit encryption.
///
/// Parsed from the multibase string users hand to `dcmanager get --secret`.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
    cipher: Aes256Gcm,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes));
        Self { bytes, cipher }
    }

    pub fn generate() -> Self {
        let mut bytes = [0; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn from_secret(secret: &str) -> Result<Self, DownloadError> {
        let (_, bytes) = multibase::decode(secret.trim())
            .map_err(|e| DownloadError::InvalidKey(e.to_string()))?;

        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            DownloadError::InvalidKey(format!(
                "expected {KEY_LEN} key bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self::from_bytes(bytes))
    }

    /// Multibase (base32) encoding accepted by [`SymmetricKey::from_secret`].
    pub fn to_secret(&self) -> String {
        multibase::encode(multibase::Base::Base32Lower, self.bytes)
    }

    /// Encrypts one unit as `nonce || ciphertext || tag`.
    pub fn encrypt_unit(&self, plaintext: &[u8]) -> Result<Vec<u8>, DownloadError> {
        let mut nonce = [0; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| DownloadError::EncryptionFailed)?;

        let mut unit = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        unit.extend_from_slice(&nonce);
        unit.extend_from_slice(&ciphertext);
        Ok(unit)
    }

    /// Decrypts one `nonce || ciphertext || tag` unit. `None` when the unit
    /// is too short or fails authentication.
    pub fn decrypt_unit(&self, unit: &[u8]) -> Option<Vec<u8>> {
        if unit.len() < UNIT_OVERHEAD {
            return None;
        }

        let (nonce, ciphertext) = unit.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()
    }

    /// Encrypts a whole plaintext the way stored content is laid out:
    /// consecutive units of [`crate::UNIT_SIZE`] plaintext bytes each.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, DownloadError> {
        let mut stored = Vec::with_capacity(plaintext.len() + UNIT_OVERHEAD);

        for chunk in plaintext.chunks(crate::UNIT_SIZE) {
            stored.extend_from_slice(&self.encrypt_unit(chunk)?);
        }

        Ok(stored)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey").finish_non_exhaustive()
    }
}
