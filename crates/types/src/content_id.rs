use core::fmt;
use core::str::FromStr;

use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Multihash code for sha2-256, the only hash function content is addressed with.
pub const SHA2_256: u64 = 0x12;

const SHA2_256_LEN: usize = 32;

/// Content-derived address of an immutable byte stream or directory listing.
///
/// Rendered as the base58btc encoding of its multihash, i.e. the `Qm…` form.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(Multihash<64>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseContentIdError {
    #[error("invalid base58 encoding: {0}")]
    Base58(String),

    #[error("invalid multihash: {0}")]
    Multihash(String),

    #[error("unsupported multihash code {code:#x}, expected sha2-256")]
    UnsupportedCode { code: u64 },
}

impl ContentId {
    /// Address of the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    pub fn from_multihash(multihash: Multihash<64>) -> Result<Self, ParseContentIdError> {
        if multihash.code() != SHA2_256 || multihash.digest().len() != SHA2_256_LEN {
            return Err(ParseContentIdError::UnsupportedCode {
                code: multihash.code(),
            });
        }

        Ok(Self(multihash))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseContentIdError> {
        let multihash = Multihash::<64>::from_bytes(bytes)
            .map_err(|e| ParseContentIdError::Multihash(e.to_string()))?;

        Self::from_multihash(multihash)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn digest(&self) -> &[u8] {
        self.0.digest()
    }

    pub fn as_multihash(&self) -> &Multihash<64> {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.to_bytes()).into_string())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

impl FromStr for ContentId {
    type Err = ParseContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| ParseContentIdError::Base58(e.to_string()))?;

        Self::from_bytes(&bytes)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher producing a [`ContentId`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> ContentId {
        let digest = self.inner.finalize();

        // A 32-byte digest always fits in a 64-byte multihash
        let multihash = Multihash::<64>::wrap(SHA2_256, &digest)
            .unwrap_or_else(|_| unreachable!("sha2-256 digest fits in multihash"));

        ContentId(multihash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha2-256("hello world") as CIDv0
    const HELLO: &str = "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4";

    #[test]
    fn known_address() {
        let cid = ContentId::of(b"hello world");
        assert_eq!(cid.to_string(), HELLO);
        assert_eq!(HELLO.parse::<ContentId>().unwrap(), cid);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), ContentId::of(b"hello world"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "0OIl".parse::<ContentId>(),
            Err(ParseContentIdError::Base58(_))
        ));
        assert!(matches!(
            "7672".parse::<ContentId>(),
            Err(ParseContentIdError::Multihash(_))
        ));
    }

    #[test]
    fn rejects_other_hash_functions() {
        // identity multihash (code 0x00) of "abc"
        let multihash = Multihash::<64>::wrap(0x00, b"abc").unwrap();
        let err = ContentId::from_bytes(&multihash.to_bytes()).unwrap_err();
        assert_eq!(err, ParseContentIdError::UnsupportedCode { code: 0 });
    }

    #[test]
    fn serde_as_string() {
        let cid = ContentId::of(b"hello world");
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(json, format!("\"{HELLO}\""));
        assert_eq!(serde_json::from_str::<ContentId>(&json).unwrap(), cid);
    }
}
