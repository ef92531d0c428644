use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] fybrk_storage::StorageError),

    #[error(transparent)]
    Crypto(#[from] fybrk_crypto::CryptoError),

    #[error(transparent)]
    Watcher(#[from] fybrk_watcher::WatcherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("unsupported protocol version {remote} (local is {local})")]
    ProtocolVersion { remote: u32, local: u32 },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("unsafe path in message: {0}")]
    UnsafePath(String),

    #[error("channel closed")]
    ChannelClosed,
}

impl From<fybrk_types::TypesError> for SyncError {
    fn from(err: fybrk_types::TypesError) -> Self {
        SyncError::UnsafePath(err.to_string())
    }
}
