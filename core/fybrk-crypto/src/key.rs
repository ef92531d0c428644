//! Shared-key file management.

use std::fs;
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::OsRng;
use rand::RngCore;

use crate::cipher::KEY_SIZE;
use crate::error::{CryptoError, CryptoResult};

/// Load the 32-byte shared key from `path`, creating it with bytes from the
/// OS random source on first run.
///
/// The key file is written with mode `0600` on Unix. An existing file with
/// the wrong length fails with `InvalidKeySize` rather than being
/// overwritten.
pub fn load_or_create_key(path: &Path) -> CryptoResult<[u8; KEY_SIZE]> {
    if path.exists() {
        let bytes = fs::read(path)?;
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&key)?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_reloads_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");

        let first = load_or_create_key(&path).unwrap();
        let second = load_or_create_key(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&path).unwrap().len(), KEY_SIZE);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        load_or_create_key(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn rejects_truncated_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, [0u8; 16]).unwrap();

        let result = load_or_create_key(&path);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeySize {
                expected: 32,
                actual: 16
            })
        ));
    }
}
