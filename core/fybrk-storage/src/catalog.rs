//! The catalog: a durable mapping from relative path to file metadata,
//! plus a table of paired devices.
//!
//! Backed by a single DuckDB file under the reserved directory. Timestamps
//! are normalized to UTC second granularity by storing epoch seconds, so a
//! `put` followed by `get` returns exactly what was stored.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use duckdb::{params, Connection};

use fybrk_types::{ContentHash, Device, DeviceId, DeviceProfile, FileMetadata};

use crate::error::{StorageError, StorageResult};

/// Durable path → metadata mapping shared across engine tasks.
///
/// Cloning is cheap; all clones share one connection guarded by a mutex.
/// After `close()`, every operation fails with `StorageError::Closed`.
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Catalog {
    /// Open or create the catalog at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 2)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }

    /// Insert or replace a file record by path. Atomic; `created_at` of an
    /// existing row is preserved.
    pub fn put(&self, meta: &FileMetadata) -> StorageResult<()> {
        let chunks_json = serde_json::to_string(&meta.chunks)?;
        let now = Utc::now().timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO files (path, hash, size, mod_time, chunks, version, created_at)
                 VALUES (?, ?, ?, ?, ?, ?,
                         COALESCE((SELECT created_at FROM files WHERE path = ?), ?))",
                params![
                    meta.path,
                    meta.hash.as_bytes().to_vec(),
                    meta.size,
                    meta.mod_time.timestamp(),
                    chunks_json,
                    meta.version,
                    meta.path,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Look up a file record by path.
    pub fn get(&self, path: &str) -> StorageResult<FileMetadata> {
        let row = self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT path, hash, size, mod_time, chunks, version FROM files WHERE path = ?",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            );
            match result {
                Ok(row) => Ok(row),
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    Err(StorageError::NotFound(path.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        decode_file_row(row)
    }

    /// All file records, ordered by path ascending. Fully materialized.
    pub fn list(&self) -> StorageResult<Vec<FileMetadata>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path, hash, size, mod_time, chunks, version FROM files ORDER BY path",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(decode_file_row).collect()
    }

    /// Delete a file record. Deleting an absent path is not an error.
    pub fn delete(&self, path: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM files WHERE path = ?", params![path])?;
            Ok(())
        })
    }

    /// Insert or replace a device record.
    pub fn put_device(&self, device: &Device) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO devices (id, name, profile, last_seen) VALUES (?, ?, ?, ?)",
                params![
                    device.id.as_str(),
                    device.name,
                    device.profile.as_i32(),
                    device.last_seen.timestamp(),
                ],
            )?;
            Ok(())
        })
    }

    /// Look up a device record by id.
    pub fn get_device(&self, id: &DeviceId) -> StorageResult<Device> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, name, profile, last_seen FROM devices WHERE id = ?",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i32>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            );
            match result {
                Ok((id, name, profile, last_seen)) => Ok(Device {
                    id: DeviceId::new(id),
                    name,
                    profile: DeviceProfile::from_i32(profile),
                    last_seen: epoch_secs(last_seen)?,
                }),
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    Err(StorageError::NotFound(id.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Release the underlying handle. Subsequent operations fail with
    /// `StorageError::Closed`. Idempotent.
    pub fn close(&self) {
        let mut guard = self.conn.lock().unwrap();
        guard.take();
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            path VARCHAR PRIMARY KEY,
            hash BLOB NOT NULL,
            size BIGINT NOT NULL,
            mod_time BIGINT NOT NULL,
            chunks VARCHAR NOT NULL,
            version BIGINT NOT NULL,
            created_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS devices (
            id VARCHAR PRIMARY KEY,
            name VARCHAR NOT NULL,
            profile INTEGER NOT NULL,
            last_seen BIGINT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);
        CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);",
    )?;
    Ok(())
}

type FileRow = (String, Vec<u8>, i64, i64, String, i64);

fn decode_file_row(row: FileRow) -> StorageResult<FileMetadata> {
    let (path, hash_bytes, size, mod_time, chunks_json, version) = row;
    let hash = ContentHash::from_slice(&hash_bytes)
        .map_err(|e| StorageError::Corrupt(format!("{path}: {e}")))?;
    let chunks: Vec<ContentHash> = serde_json::from_str(&chunks_json)?;
    Ok(FileMetadata {
        path,
        hash,
        size,
        mod_time: epoch_secs(mod_time)?,
        chunks,
        version,
    })
}

fn epoch_secs(secs: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {secs}")))
}
