use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;

/// A 32-byte digest produced by a [`ContentHasher`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HasherError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HasherError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HasherError> {
        let bytes = hex::decode(s).map_err(|e| HasherError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash function behind every ledger digest.
///
/// One algorithm is chosen per deployment and must not change once records
/// exist: switching it makes every stored chain fail verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainDigest {
    #[default]
    Sha256,
    Blake3,
}

impl ChainDigest {
    fn digest_parts(&self, parts: &[&[u8]]) -> Digest {
        match self {
            Self::Sha256 => {
                let mut hasher = sha2::Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                Digest(hasher.finalize().into())
            }
            Self::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                for part in parts {
                    hasher.update(part);
                }
                Digest(*hasher.finalize().as_bytes())
            }
        }
    }
}

impl fmt::Display for ChainDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => f.write_str("sha256"),
            Self::Blake3 => f.write_str("blake3"),
        }
    }
}

/// Domain-separated content hasher.
///
/// Each hasher carries a domain tag (e.g., `"ack-payload-v1"`,
/// `"ack-record-v1"`) that is prepended to every hash computation. A payload
/// and a record with identical bytes therefore never share a digest.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for canonical acknowledgment payloads.
    pub const PAYLOAD: Self = Self {
        domain: "ack-payload-v1",
    };
    /// Hasher for whole signature records (chain links).
    pub const RECORD: Self = Self {
        domain: "ack-record-v1",
    };
    /// Hasher for per-document genesis values.
    pub const GENESIS: Self = Self {
        domain: "ack-genesis-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, algorithm: ChainDigest, data: &[u8]) -> Digest {
        algorithm.digest_parts(&[self.domain.as_bytes(), b":", data])
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// Struct fields serialize in declaration order, which makes the JSON
    /// encoding of a fixed struct canonical.
    pub fn hash_json<T: Serialize>(
        &self,
        algorithm: ChainDigest,
        value: &T,
    ) -> Result<Digest, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(algorithm, &data))
    }

    pub fn verify(&self, algorithm: ChainDigest, data: &[u8], expected: &Digest) -> bool {
        self.hash(algorithm, data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("digest must be 32 bytes, got {0}")]
    InvalidLength(usize),
}
