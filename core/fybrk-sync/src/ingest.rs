//! The ingest pipeline: everything that touches the filesystem and the
//! catalog on behalf of the engine and the replicator.
//!
//! The engine is a catalog over the filesystem, not a chunk store: sealed
//! chunk bodies are never retained, and chunk bytes are re-derived from the
//! live file whenever a peer asks. All methods here block; async callers go
//! through `tokio::task::spawn_blocking`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use fybrk_crypto::Cryptor;
use fybrk_storage::{Catalog, Chunker, StorageError};
use fybrk_types::{normalize_rel_path, relative_to_root, Chunk, ContentHash, FileMetadata};

use crate::error::{SyncError, SyncResult};

/// Shared blocking half of the sync engine.
pub(crate) struct Ingestor {
    pub(crate) catalog: Catalog,
    pub(crate) chunker: Chunker,
    pub(crate) cryptor: Arc<Cryptor>,
    pub(crate) sync_root: PathBuf,
}

impl Ingestor {
    /// Catalog-form relative path of `abs`, or `None` when it falls outside
    /// the sync root or inside the reserved directory.
    pub(crate) fn relative(&self, abs: &Path) -> Option<String> {
        relative_to_root(&self.sync_root, abs)
    }

    /// Ingest one observed path. Returns the new version when the catalog
    /// changed, `None` when the path was skipped or unchanged.
    pub(crate) fn ingest_path(&self, abs: &Path) -> SyncResult<Option<i64>> {
        let Some(rel) = self.relative(abs) else {
            return Ok(None);
        };

        // Vanished between event and processing, or not a regular file
        let Ok(stat) = fs::metadata(abs) else {
            return Ok(None);
        };
        if stat.is_dir() {
            return Ok(None);
        }

        let size = stat.len() as i64;
        let mod_time = system_time_secs(stat.modified()?);

        let existing = match self.catalog.get(&rel) {
            Ok(meta) => Some(meta),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(ref prior) = existing {
            if prior.size == size && prior.mod_time == mod_time {
                return Ok(None);
            }
        }

        let mut chunks = self.chunker.split_file(abs)?;
        let chunk_hashes: Vec<ContentHash> = chunks.iter().map(|c| c.hash).collect();
        let mut hasher = Sha256::new();
        for chunk in &chunks {
            hasher.update(&chunk.data);
        }
        let file_hash = ContentHash::from_hasher(hasher);

        // Sealed bodies are not retained; the live file is re-chunked when
        // a peer requests it
        for chunk in &mut chunks {
            self.cryptor.seal(chunk)?;
        }
        drop(chunks);

        let version = existing.map_or(1, |prior| prior.version + 1);
        let meta = FileMetadata {
            path: rel.clone(),
            hash: file_hash,
            size,
            mod_time,
            chunks: chunk_hashes,
            version,
        };
        self.catalog.put(&meta)?;
        debug!(path = %rel, version, size, "ingested file");
        Ok(Some(version))
    }

    /// Remove one observed path from the catalog. Returns the departed
    /// `(path, version)` when a record existed.
    pub(crate) fn remove_path(&self, abs: &Path) -> SyncResult<Option<(String, i64)>> {
        let Some(rel) = self.relative(abs) else {
            return Ok(None);
        };
        let prior = match self.catalog.get(&rel) {
            Ok(meta) => Some(meta.version),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        self.catalog.delete(&rel)?;
        if prior.is_some() {
            debug!(path = %rel, "removed from catalog");
        }
        Ok(prior.map(|version| (rel, version)))
    }

    /// Full walk of the sync root, ingesting every regular file. Per-file
    /// errors are logged and do not abort the walk. Returns the number of
    /// files whose catalog record changed.
    pub(crate) fn scan(&self) -> SyncResult<usize> {
        let mut changed = 0;
        let mut builder = WalkBuilder::new(&self.sync_root);
        builder
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .hidden(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                name != fybrk_types::RESERVED_DIR && !name.ends_with('~')
            });

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "scan: walk error");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match self.ingest_path(path) {
                Ok(Some(_)) => changed += 1,
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "scan: ingest failed"),
            }
        }
        Ok(changed)
    }

    /// Re-split the live file behind a catalog entry and seal every chunk,
    /// for serving a `file_request`.
    pub(crate) fn sealed_chunks(&self, path: &str) -> SyncResult<Vec<Chunk>> {
        let meta = self.catalog.get(path)?;
        let abs = self.sync_root.join(&meta.path);
        let mut chunks = self.chunker.split_file(&abs)?;
        for chunk in &mut chunks {
            self.cryptor.seal(chunk)?;
        }
        Ok(chunks)
    }

    /// Apply a received `file_response` atomically.
    ///
    /// Opens every chunk (any AEAD failure aborts before anything touches
    /// the filesystem), verifies the reassembled bytes against the
    /// requested metadata, then writes via temp-sibling + rename so the
    /// watcher never sees partial contents. The catalog entry preserves
    /// the sender's version.
    pub(crate) fn apply_remote_file(
        &self,
        remote: &FileMetadata,
        mut chunks: Vec<Chunk>,
    ) -> SyncResult<()> {
        for chunk in &mut chunks {
            self.cryptor.open(chunk)?;
        }
        let data = self.chunker.reassemble(&chunks);

        let hash = ContentHash::compute(&data);
        if hash != remote.hash {
            return Err(SyncError::Integrity(format!(
                "{}: reassembled content does not match advertised hash",
                remote.path
            )));
        }

        let rel = normalize_rel_path(Path::new(&remote.path))?;
        let abs = self.sync_root.join(&rel);
        let parent = abs.parent().unwrap_or(&self.sync_root);
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&abs).map_err(|e| SyncError::Io(e.error))?;

        let stat = fs::metadata(&abs)?;
        let new_chunks = self.chunker.split(&data[..])?;
        let meta = FileMetadata {
            path: rel.clone(),
            hash,
            size: stat.len() as i64,
            mod_time: system_time_secs(stat.modified()?),
            chunks: new_chunks.iter().map(|c| c.hash).collect(),
            version: remote.version,
        };
        self.catalog.put(&meta)?;
        info!(path = %rel, version = remote.version, "applied remote file");
        Ok(())
    }

    /// Apply a remote delete: honored only when the local record is not
    /// newer than the advertised version.
    pub(crate) fn apply_remote_delete(&self, path: &str, version: i64) -> SyncResult<bool> {
        let rel = normalize_rel_path(Path::new(path))?;
        let local = match self.catalog.get(&rel) {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if local.version > version {
            debug!(path = %rel, local = local.version, remote = version, "ignoring stale delete");
            return Ok(false);
        }

        let abs = self.sync_root.join(&rel);
        if let Err(e) = fs::remove_file(&abs) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        self.catalog.delete(&rel)?;
        info!(path = %rel, version, "applied remote delete");
        Ok(true)
    }
}

/// Convert a filesystem timestamp to UTC second granularity, matching the
/// catalog's storage normalization so clean-checks compare equal.
fn system_time_secs(time: SystemTime) -> DateTime<Utc> {
    let dt: DateTime<Utc> = time.into();
    DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fybrk_storage::DEFAULT_CHUNK_SIZE;

    fn ingestor(root: &Path) -> Ingestor {
        Ingestor {
            catalog: Catalog::open_in_memory().unwrap(),
            chunker: Chunker::new(DEFAULT_CHUNK_SIZE),
            cryptor: Arc::new(Cryptor::new(&[9u8; 32]).unwrap()),
            sync_root: root.to_path_buf(),
        }
    }

    #[test]
    fn ingest_creates_then_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let file = dir.path().join("f.txt");

        std::fs::write(&file, b"v1").unwrap();
        assert_eq!(ing.ingest_path(&file).unwrap(), Some(1));

        // Unchanged (size, mtime): clean, no bump
        assert_eq!(ing.ingest_path(&file).unwrap(), None);

        // Changed content with different size
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(&file, b"v2 longer").unwrap();
        assert_eq!(ing.ingest_path(&file).unwrap(), Some(2));

        let meta = ing.catalog.get("f.txt").unwrap();
        assert_eq!(meta.size, 9);
        assert_eq!(meta.version, 2);
    }

    #[test]
    fn ingest_skips_outsiders_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());

        assert_eq!(ing.ingest_path(Path::new("/etc/hostname")).unwrap(), None);
        assert_eq!(ing.ingest_path(dir.path()).unwrap(), None);
        assert_eq!(
            ing.ingest_path(&dir.path().join("missing.txt")).unwrap(),
            None
        );
    }

    #[test]
    fn scan_ignores_reserved_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());

        std::fs::create_dir(dir.path().join(".fybrk")).unwrap();
        std::fs::write(dir.path().join(".fybrk/key"), b"secret").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::write(dir.path().join("backup.txt~"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/real.txt"), b"content").unwrap();

        assert_eq!(ing.scan().unwrap(), 1);
        let listed = ing.catalog.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "docs/real.txt");
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        std::fs::write(dir.path().join("empty"), b"").unwrap();

        ing.scan().unwrap();
        let meta = ing.catalog.get("empty").unwrap();
        assert_eq!(meta.size, 0);
        assert!(meta.chunks.is_empty());
    }

    #[test]
    fn remove_reports_departed_version() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let file = dir.path().join("gone.txt");
        std::fs::write(&file, b"data").unwrap();
        ing.ingest_path(&file).unwrap();

        std::fs::remove_file(&file).unwrap();
        assert_eq!(
            ing.remove_path(&file).unwrap(),
            Some(("gone.txt".to_string(), 1))
        );
        // Idempotent
        assert_eq!(ing.remove_path(&file).unwrap(), None);
    }

    #[test]
    fn serve_then_apply_roundtrip() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = ingestor(src_dir.path());
        let dst = ingestor(dst_dir.path());

        std::fs::write(src_dir.path().join("shared.txt"), b"mirror me").unwrap();
        src.scan().unwrap();
        let meta = src.catalog.get("shared.txt").unwrap();

        let chunks = src.sealed_chunks("shared.txt").unwrap();
        assert!(chunks.iter().all(|c| c.encrypted));

        dst.apply_remote_file(&meta, chunks).unwrap();
        assert_eq!(
            std::fs::read(dst_dir.path().join("shared.txt")).unwrap(),
            b"mirror me"
        );
        let applied = dst.catalog.get("shared.txt").unwrap();
        assert_eq!(applied.version, meta.version);
        assert_eq!(applied.hash, meta.hash);
    }

    #[test]
    fn apply_rejects_wrong_key_without_writing() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = ingestor(src_dir.path());
        let mut dst = ingestor(dst_dir.path());
        dst.cryptor = Arc::new(Cryptor::new(&[1u8; 32]).unwrap());

        std::fs::write(src_dir.path().join("secret.txt"), b"classified").unwrap();
        src.scan().unwrap();
        let meta = src.catalog.get("secret.txt").unwrap();
        let chunks = src.sealed_chunks("secret.txt").unwrap();

        let result = dst.apply_remote_file(&meta, chunks);
        assert!(matches!(
            result,
            Err(SyncError::Crypto(fybrk_crypto::CryptoError::Decryption(_)))
        ));
        assert!(!dst_dir.path().join("secret.txt").exists());
        assert!(dst.catalog.get("secret.txt").is_err());
    }

    #[test]
    fn apply_rejects_unsafe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let mut meta = FileMetadata {
            path: "../escape.txt".to_string(),
            hash: ContentHash::compute(b"x"),
            size: 1,
            mod_time: Utc::now(),
            chunks: vec![ContentHash::compute(b"x")],
            version: 1,
        };
        let chunk = Chunk::new(b"x".to_vec());
        meta.hash = ContentHash::compute(b"x");

        let result = ing.apply_remote_file(&meta, vec![chunk]);
        assert!(matches!(result, Err(SyncError::UnsafePath(_))));
    }

    #[test]
    fn remote_delete_respects_versions() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let file = dir.path().join("d.txt");
        std::fs::write(&file, b"1").unwrap();
        ing.ingest_path(&file).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(&file, b"22").unwrap();
        ing.ingest_path(&file).unwrap(); // version 2

        // Stale delete (version 1) is ignored
        assert!(!ing.apply_remote_delete("d.txt", 1).unwrap());
        assert!(file.exists());

        // Delete at current version applies
        assert!(ing.apply_remote_delete("d.txt", 2).unwrap());
        assert!(!file.exists());
        assert!(ing.catalog.get("d.txt").is_err());

        // Unknown path: no-op
        assert!(!ing.apply_remote_delete("d.txt", 9).unwrap());
    }
}
