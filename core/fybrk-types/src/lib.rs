//! Shared domain types for fybrk.
//!
//! Everything that crosses a crate boundary lives here: content hashes,
//! chunks, file metadata, device records, and the relative-path rules that
//! keep catalog paths portable between devices.

mod chunk;
mod device;
mod file;
mod hash;
mod path;

pub use chunk::Chunk;
pub use device::{Device, DeviceId, DeviceProfile};
pub use file::FileMetadata;
pub use hash::{ContentHash, HASH_SIZE};
pub use path::{normalize_rel_path, relative_to_root, RESERVED_DIR};

use thiserror::Error;

/// Errors for type-level validation (hash parsing, path normalization).
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("unsafe relative path: {0}")]
    UnsafePath(String),
}

pub type TypesResult<T> = Result<T, TypesError>;
