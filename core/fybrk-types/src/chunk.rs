//! Chunk: a fixed-size byte range of a file, identified by the SHA-256 of
//! its plaintext.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// A contiguous byte range of a file.
///
/// `hash` always refers to the plaintext, even while `data` holds the
/// sealed form. When `encrypted` is set, `data` is `nonce ∥ ciphertext ∥ tag`
/// and is longer than the plaintext by exactly the AEAD overhead.
#[derive(Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub hash: ContentHash,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub size: i64,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Create an unsealed chunk from plaintext bytes.
    pub fn new(data: Vec<u8>) -> Self {
        let hash = ContentHash::compute(&data);
        let size = data.len() as i64;
        Self {
            hash,
            data,
            size,
            encrypted: false,
            created_at: Utc::now(),
        }
    }

    /// Verify an unsealed chunk's integrity against its hash.
    ///
    /// Always `false` for sealed chunks, whose buffer no longer matches.
    pub fn verify(&self) -> bool {
        !self.encrypted && self.hash.verify(&self.data)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("hash", &self.hash)
            .field("size", &self.size)
            .field("encrypted", &self.encrypted)
            .field("buffer_len", &self.data.len())
            .finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
