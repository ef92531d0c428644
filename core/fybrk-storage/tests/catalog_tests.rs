use chrono::{TimeZone, Utc};
use fybrk_storage::{Catalog, StorageError};
use fybrk_types::{ContentHash, Device, DeviceId, DeviceProfile, FileMetadata};
use pretty_assertions::assert_eq;

fn meta(path: &str, version: i64) -> FileMetadata {
    FileMetadata {
        path: path.to_string(),
        hash: ContentHash::compute(path.as_bytes()),
        size: 42,
        mod_time: Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 15).unwrap(),
        chunks: vec![
            ContentHash::compute(b"chunk-0"),
            ContentHash::compute(b"chunk-1"),
        ],
        version,
    }
}

#[test]
fn put_get_roundtrip() {
    let catalog = Catalog::open_in_memory().unwrap();
    let m = meta("docs/readme.md", 1);
    catalog.put(&m).unwrap();
    assert_eq!(catalog.get("docs/readme.md").unwrap(), m);
}

#[test]
fn put_is_idempotent() {
    let catalog = Catalog::open_in_memory().unwrap();
    let m = meta("a.txt", 2);
    catalog.put(&m).unwrap();
    catalog.put(&m).unwrap();
    assert_eq!(catalog.get("a.txt").unwrap(), m);
    assert_eq!(catalog.list().unwrap().len(), 1);
}

#[test]
fn put_replaces_by_path() {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog.put(&meta("a.txt", 1)).unwrap();

    let mut updated = meta("a.txt", 2);
    updated.size = 99;
    updated.hash = ContentHash::compute(b"new content");
    catalog.put(&updated).unwrap();

    let stored = catalog.get("a.txt").unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.size, 99);
    assert_eq!(catalog.list().unwrap().len(), 1);
}

#[test]
fn mod_time_normalized_to_utc_seconds() {
    let catalog = Catalog::open_in_memory().unwrap();
    let mut m = meta("t.bin", 1);
    // Sub-second precision is dropped at the storage boundary
    m.mod_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::milliseconds(750);
    catalog.put(&m).unwrap();

    let stored = catalog.get("t.bin").unwrap();
    assert_eq!(stored.mod_time.timestamp(), 1_700_000_000);
    assert_eq!(stored.mod_time.timestamp_subsec_millis(), 0);
}

#[test]
fn get_missing_is_not_found() {
    let catalog = Catalog::open_in_memory().unwrap();
    assert!(matches!(
        catalog.get("nope"),
        Err(StorageError::NotFound(p)) if p == "nope"
    ));
}

#[test]
fn list_orders_by_path() {
    let catalog = Catalog::open_in_memory().unwrap();
    for path in ["zz.txt", "aa.txt", "mm/inner.txt"] {
        catalog.put(&meta(path, 1)).unwrap();
    }
    let paths: Vec<String> = catalog.list().unwrap().into_iter().map(|m| m.path).collect();
    assert_eq!(paths, vec!["aa.txt", "mm/inner.txt", "zz.txt"]);
}

#[test]
fn delete_is_idempotent() {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog.put(&meta("gone.txt", 1)).unwrap();
    catalog.delete("gone.txt").unwrap();
    catalog.delete("gone.txt").unwrap();
    catalog.delete("never-existed.txt").unwrap();
    assert!(catalog.list().unwrap().is_empty());
}

#[test]
fn empty_chunk_list_roundtrips() {
    let catalog = Catalog::open_in_memory().unwrap();
    let mut m = meta("empty.txt", 1);
    m.size = 0;
    m.chunks = Vec::new();
    catalog.put(&m).unwrap();
    assert_eq!(catalog.get("empty.txt").unwrap().chunks, Vec::new());
}

#[test]
fn device_roundtrip() {
    let catalog = Catalog::open_in_memory().unwrap();
    let device = Device {
        id: DeviceId::new("laptop-1234"),
        name: "laptop".to_string(),
        profile: DeviceProfile::SmartCache,
        last_seen: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    };
    catalog.put_device(&device).unwrap();
    assert_eq!(catalog.get_device(&device.id).unwrap(), device);

    assert!(matches!(
        catalog.get_device(&DeviceId::new("unknown")),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn close_makes_operations_fail() {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog.put(&meta("a.txt", 1)).unwrap();
    catalog.close();
    catalog.close(); // idempotent

    assert!(matches!(catalog.get("a.txt"), Err(StorageError::Closed)));
    assert!(matches!(catalog.list(), Err(StorageError::Closed)));
    assert!(matches!(
        catalog.put(&meta("b.txt", 1)),
        Err(StorageError::Closed)
    ));
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("metadata.db");

    {
        let catalog = Catalog::open(&db).unwrap();
        catalog.put(&meta("kept.txt", 5)).unwrap();
        catalog.close();
    }

    let catalog = Catalog::open(&db).unwrap();
    let stored = catalog.get("kept.txt").unwrap();
    assert_eq!(stored.version, 5);
}

#[test]
fn concurrent_puts_do_not_tear() {
    use std::sync::Arc;
    use std::thread;

    let catalog = Arc::new(Catalog::open_in_memory().unwrap());
    let mut handles = Vec::new();
    for version in 1..=8i64 {
        let catalog = Arc::clone(&catalog);
        handles.push(thread::spawn(move || {
            catalog.put(&meta("contended.txt", version)).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // One of the eight versions won; the record is internally consistent
    let stored = catalog.get("contended.txt").unwrap();
    assert!((1..=8).contains(&stored.version));
    assert_eq!(stored.chunks.len(), 2);
}
