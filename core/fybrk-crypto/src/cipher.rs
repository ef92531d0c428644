//! AES-256-GCM sealing and opening of individual chunks.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use fybrk_types::Chunk;

use crate::error::{CryptoError, CryptoResult};

/// AES-256 key size (32 bytes).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Total growth of a chunk buffer when sealed (nonce + tag).
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Seals and opens chunk payloads under a shared symmetric key.
///
/// Immutable after construction and safe for concurrent use.
pub struct Cryptor {
    cipher: Aes256Gcm,
}

impl Cryptor {
    /// Build a cryptor from a 32-byte key.
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Seal a chunk in place.
    ///
    /// A fresh random nonce is drawn per seal, so sealing the same chunk
    /// twice yields different buffers. Sealing an already-sealed chunk is a
    /// no-op.
    pub fn seal(&self, chunk: &mut Chunk) -> CryptoResult<()> {
        if chunk.encrypted {
            return Ok(());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, chunk.data.as_slice())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        chunk.data = sealed;
        chunk.encrypted = true;

        Ok(())
    }

    /// Open a sealed chunk in place, restoring the plaintext.
    ///
    /// Opening an unsealed chunk is a no-op. Fails with `Decryption` when
    /// the buffer is too short to contain a nonce and tag or when tag
    /// verification fails.
    pub fn open(&self, chunk: &mut Chunk) -> CryptoResult<()> {
        if !chunk.encrypted {
            return Ok(());
        }

        if chunk.data.len() < SEAL_OVERHEAD {
            return Err(CryptoError::Decryption(
                "sealed buffer too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = chunk.data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;

        chunk.data = plaintext;
        chunk.encrypted = false;

        Ok(())
    }
}

impl std::fmt::Debug for Cryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cryptor([REDACTED])")
    }
}
