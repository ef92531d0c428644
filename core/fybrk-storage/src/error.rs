use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("catalog error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("not found in catalog: {0}")]
    NotFound(String),

    #[error("catalog is closed")]
    Closed,

    #[error("corrupt catalog row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
