//! SHA-256 content hashing for chunks and whole files.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{TypesError, TypesResult};

/// Size of a content hash in bytes.
pub const HASH_SIZE: usize = 32;

/// SHA-256 hash of plaintext content.
///
/// Serializes as a 64-character lowercase hex string on the wire; the
/// catalog stores the raw 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Compute the SHA-256 of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let digest: [u8; HASH_SIZE] = Sha256::digest(data).into();
        Self(digest)
    }

    /// Finalize an incrementally-fed hasher into a `ContentHash`.
    pub fn from_hasher(hasher: Sha256) -> Self {
        let digest: [u8; HASH_SIZE] = hasher.finalize().into();
        Self(digest)
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, validating length.
    pub fn from_slice(slice: &[u8]) -> TypesResult<Self> {
        if slice.len() != HASH_SIZE {
            return Err(TypesError::InvalidHash(format!(
                "expected {HASH_SIZE} bytes, got {}",
                slice.len()
            )));
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> TypesResult<Self> {
        if hex.len() != HASH_SIZE * 2 {
            return Err(TypesError::InvalidHash(format!(
                "expected {} hex chars, got {}",
                HASH_SIZE * 2,
                hex.len()
            )));
        }
        let mut bytes = [0u8; HASH_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| TypesError::InvalidHash(format!("non-hex digits: {pair:?}")))?;
        }
        Ok(Self(bytes))
    }

    /// Verify that `data` hashes to this value.
    pub fn verify(&self, data: &[u8]) -> bool {
        self == &Self::compute(data)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}
