//! Authenticated encryption for fybrk chunks.
//!
//! AES-256-GCM under a 32-byte shared key. A sealed chunk buffer is
//! `nonce ∥ ciphertext ∥ tag`; the chunk's content hash keeps referring to
//! the plaintext so that sealing never changes identity.

mod cipher;
mod error;
mod key;

pub use cipher::{Cryptor, KEY_SIZE, NONCE_SIZE, SEAL_OVERHEAD, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::load_or_create_key;
