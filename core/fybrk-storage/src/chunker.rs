//! Fixed-size splitting and recombining of file contents.
//!
//! Splitting is fixed-size rather than content-defined: the hot path is
//! small-file mirroring, where identical whole files dedup perfectly and
//! the simplicity pays for itself. All devices must run the same chunk
//! size — it is configuration, not metadata.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use fybrk_types::Chunk;

use crate::error::StorageResult;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Deterministic fixed-size chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker; a zero size falls back to the default.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split a byte stream into chunks.
    ///
    /// Every chunk has length exactly `chunk_size` except possibly the
    /// last. Empty input yields no chunks.
    pub fn split<R: Read>(&self, mut reader: R) -> StorageResult<Vec<Chunk>> {
        let mut chunks = Vec::new();
        loop {
            let mut buf = vec![0u8; self.chunk_size];
            let mut filled = 0;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);
            chunks.push(Chunk::new(buf));
            if filled < self.chunk_size {
                break;
            }
        }
        Ok(chunks)
    }

    /// Split a file on disk, reading it sequentially.
    pub fn split_file(&self, path: &Path) -> StorageResult<Vec<Chunk>> {
        let file = File::open(path)?;
        self.split(BufReader::new(file))
    }

    /// Concatenate chunk payloads back into the original bytes.
    ///
    /// The caller supplies chunks in order; hashes are not verified here —
    /// the sync engine checks the result against stored metadata.
    pub fn reassemble(&self, chunks: &[Chunk]) -> Vec<u8> {
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        let mut result = Vec::with_capacity(total);
        for chunk in chunks {
            result.extend_from_slice(&chunk.data);
        }
        result
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fybrk_types::ContentHash;
    use proptest::prelude::*;

    #[test]
    fn boundary_sizes_are_preserved() {
        let chunker = Chunker::new(10);
        let data = vec![7u8; 25];
        let chunks = chunker.split(&data[..]).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].size, 10);
        assert_eq!(chunks[1].size, 10);
        assert_eq!(chunks[2].size, 5);
        for (i, chunk) in chunks.iter().enumerate() {
            let range = &data[i * 10..(i * 10 + chunk.size as usize)];
            assert_eq!(chunk.hash, ContentHash::compute(range));
        }
        assert_eq!(chunker.reassemble(&chunks), data);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        let chunks = chunker.split(&[][..]).unwrap();
        assert!(chunks.is_empty());
        assert!(chunker.reassemble(&chunks).is_empty());
    }

    #[test]
    fn exact_multiple_has_no_tail_chunk() {
        let chunker = Chunker::new(8);
        let data = vec![1u8; 24];
        let chunks = chunker.split(&data[..]).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.size == 8));
    }

    #[test]
    fn zero_size_falls_back_to_default() {
        assert_eq!(Chunker::new(0).chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn split_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello chunked world").unwrap();

        let chunker = Chunker::new(5);
        let chunks = chunker.split_file(&path).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunker.reassemble(&chunks), b"hello chunked world");
    }

    proptest! {
        #[test]
        fn split_reassemble_roundtrip(
            data in prop::collection::vec(any::<u8>(), 0..8192),
            chunk_size in 1usize..512,
        ) {
            let chunker = Chunker::new(chunk_size);
            let chunks = chunker.split(&data[..]).unwrap();

            // Every chunk full-size except possibly the last
            for chunk in chunks.iter().rev().skip(1) {
                prop_assert_eq!(chunk.size as usize, chunk_size);
            }
            // Hashes match each chunk's own bytes
            for chunk in &chunks {
                prop_assert!(chunk.verify());
            }
            prop_assert_eq!(chunker.reassemble(&chunks), data);
        }
    }
}
