//! Durable storage for fybrk.
//!
//! Provides the catalog (a DuckDB file mapping relative paths to file
//! metadata plus a peer table) and the fixed-size chunker.

mod catalog;
mod chunker;
mod error;

pub use catalog::Catalog;
pub use chunker::{Chunker, DEFAULT_CHUNK_SIZE};
pub use error::{StorageError, StorageResult};

use std::path::Path;

use duckdb::Connection;
use tracing::warn;

/// Open a DuckDB connection with stale-WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the
/// database, the WAL is removed and the open retried once — an unclean
/// shutdown can leave a WAL that prevents reopening. `memory_limit` and
/// `threads` cap per-database resource usage (DuckDB defaults to most of
/// system RAM and every core).
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<Connection> {
    let conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if !wal_path.exists() {
                return Err(first_err.into());
            }
            warn!(
                wal = %wal_path.display(),
                "database open failed, removing stale WAL and retrying"
            );
            std::fs::remove_file(&wal_path)?;
            Connection::open(path)?
        }
    };

    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
    ))?;

    Ok(conn)
}
