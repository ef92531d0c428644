//! Per-file metadata as tracked by the catalog and exchanged in file lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// One tracked file.
///
/// `path` is relative to the sync root, forward-slash normalized and never
/// escaping it. `version` is a per-path monotonic counter on the owning
/// device and the sole tiebreaker during reconciliation. `chunks` lists the
/// plaintext hashes of the file's chunks in order; concatenating those
/// chunks reproduces a file of `size` bytes hashing to `hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub hash: ContentHash,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub chunks: Vec<ContentHash>,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_shape() {
        let meta = FileMetadata {
            path: "docs/a.txt".to_string(),
            hash: ContentHash::compute(b"hello"),
            size: 5,
            mod_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            chunks: vec![ContentHash::compute(b"hello")],
            version: 3,
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(json["path"], "docs/a.txt");
        assert_eq!(json["size"], 5);
        assert_eq!(json["version"], 3);
        assert_eq!(json["hash"].as_str().unwrap().len(), 64);
        assert_eq!(json["chunks"].as_array().unwrap().len(), 1);
        // RFC3339 timestamp
        assert!(json["mod_time"].as_str().unwrap().starts_with("2024-05-01T12:00:00"));

        let back: FileMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
