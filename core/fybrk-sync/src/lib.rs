//! The fybrk sync engine and peer-to-peer replicator.
//!
//! Mirrors a local directory across paired devices: a catalog over the
//! filesystem (the filesystem is ground truth), a watcher-driven ingest
//! pipeline, and a symmetric replication protocol that exchanges file
//! lists, requests missing chunks, and applies received files atomically.
//! Chunk payloads are sealed end-to-end; the transport itself carries no
//! confidentiality.

mod config;
mod engine;
mod error;
mod ingest;
mod protocol;
mod replicator;
mod transport;

pub use config::EngineConfig;
pub use engine::{SyncEngine, CATALOG_FILE, DEVICE_ID_FILE, KEY_FILE};
pub use error::{SyncError, SyncResult};
pub use protocol::{
    FileDelete, FileDeletePayload, FileListPayload, FileRequest, FileRequestPayload,
    FileResponse, FileResponsePayload, SyncMessage, SyncPayload, PROTOCOL_VERSION,
};
pub use transport::{Connection, FrameSink, FrameSource, Listener, TcpTransport, Transport};

pub use fybrk_types::{
    Chunk, ContentHash, Device, DeviceId, DeviceProfile, FileMetadata, RESERVED_DIR,
};
