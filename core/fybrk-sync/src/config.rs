use std::time::Duration;

use fybrk_storage::DEFAULT_CHUNK_SIZE;

/// Configuration for a sync engine instance.
///
/// `chunk_size` is configuration, not metadata: every paired device must
/// run the same value or chunk lists will never line up.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunk size in bytes for splitting files.
    pub chunk_size: usize,
    /// Interval between `file_list` broadcasts to connected peers.
    pub broadcast_interval: Duration,
    /// Interval between reconnection attempts to configured peers.
    pub reconnect_interval: Duration,
    /// Timeout for a single outbound dial.
    pub dial_timeout: Duration,
    /// Addresses (`host:port`) of known peers to connect out to.
    pub peer_addrs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            broadcast_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(2),
            peer_addrs: Vec::new(),
        }
    }
}
