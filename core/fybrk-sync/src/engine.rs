//! The sync engine: owns the catalog, chunker, cryptor, watcher, and
//! replicator, and keeps the catalog an authoritative description of the
//! sync directory — modulo event-loss windows, which periodic scans
//! reconcile.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fybrk_crypto::{load_or_create_key, Cryptor};
use fybrk_storage::{Catalog, Chunker};
use fybrk_types::{DeviceId, FileMetadata, RESERVED_DIR};
use fybrk_watcher::{FileEvent, FileOp, FileWatcher, WatcherError};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::ingest::Ingestor;
use crate::replicator::Replicator;
use crate::transport::{TcpTransport, Transport};

/// Catalog database filename under the reserved directory.
pub const CATALOG_FILE: &str = "metadata.db";

/// Shared-key filename under the reserved directory.
pub const KEY_FILE: &str = "key";

/// Device-id filename under the reserved directory.
pub const DEVICE_ID_FILE: &str = "device_id";

/// The core orchestrator for one sync directory.
pub struct SyncEngine {
    ingestor: Arc<Ingestor>,
    device_id: DeviceId,
    config: EngineConfig,
    cancel: CancellationToken,
    watcher: Mutex<Option<FileWatcher>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    replicator: Arc<RwLock<Option<Replicator>>>,
    closed: AtomicBool,
}

impl SyncEngine {
    /// Assemble an engine from its parts. Attaches a watcher to
    /// `sync_root` and spawns the event-processing task; fails if the
    /// watcher cannot subscribe.
    pub fn new(
        catalog: Catalog,
        chunker: Chunker,
        cryptor: Cryptor,
        sync_root: &Path,
        device_id: DeviceId,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let sync_root = fs::canonicalize(sync_root)?;

        let ingestor = Arc::new(Ingestor {
            catalog,
            chunker,
            cryptor: Arc::new(cryptor),
            sync_root: sync_root.clone(),
        });

        let mut watcher = FileWatcher::new()?;
        watcher.add(&sync_root)?;
        let events = watcher.events().ok_or(SyncError::ChannelClosed)?;
        let errors = watcher.errors().ok_or(SyncError::ChannelClosed)?;

        let cancel = CancellationToken::new();
        let replicator = Arc::new(RwLock::new(None));

        let event_task = tokio::spawn(event_loop(
            ingestor.clone(),
            replicator.clone(),
            events,
            errors,
            cancel.clone(),
        ));

        info!(root = %sync_root.display(), device = %device_id, "sync engine started");

        Ok(Self {
            ingestor,
            device_id,
            config,
            cancel,
            watcher: Mutex::new(Some(watcher)),
            event_task: Mutex::new(Some(event_task)),
            replicator,
            closed: AtomicBool::new(false),
        })
    }

    /// Bootstrap an engine on `sync_root` with on-disk state under the
    /// reserved directory: the catalog database, the shared key (created
    /// from the OS random source on first run), and a persistent device
    /// id.
    pub fn open(sync_root: &Path, config: EngineConfig) -> SyncResult<Self> {
        fs::create_dir_all(sync_root)?;
        let reserved = sync_root.join(RESERVED_DIR);
        fs::create_dir_all(&reserved)?;

        let key = load_or_create_key(&reserved.join(KEY_FILE))?;
        let cryptor = Cryptor::new(&key)?;
        let catalog = Catalog::open(&reserved.join(CATALOG_FILE))?;
        let chunker = Chunker::new(config.chunk_size);
        let device_id = load_or_create_device_id(&reserved.join(DEVICE_ID_FILE))?;

        Self::new(catalog, chunker, cryptor, sync_root, device_id, config)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn sync_root(&self) -> &Path {
        &self.ingestor.sync_root
    }

    /// Synchronous full walk of the sync root. Returns the number of files
    /// whose catalog record changed.
    pub fn scan(&self) -> SyncResult<usize> {
        self.ingestor.scan()
    }

    /// All tracked files, ordered by path.
    pub fn list(&self) -> SyncResult<Vec<FileMetadata>> {
        Ok(self.ingestor.catalog.list()?)
    }

    /// Start the replicator listening on `port` (0 = OS-chosen).
    /// Idempotent: a second call is a no-op.
    pub async fn enable_replication(&self, port: u16) -> SyncResult<()> {
        if self.replicator.read().unwrap().is_some() {
            return Ok(());
        }
        let transport: Arc<dyn Transport> =
            Arc::new(TcpTransport::new(self.config.dial_timeout));
        let replicator = Replicator::start(
            self.device_id.clone(),
            self.ingestor.clone(),
            transport,
            self.config.clone(),
            self.cancel.clone(),
            port,
        )
        .await?;

        let mut slot = self.replicator.write().unwrap();
        if slot.is_none() {
            *slot = Some(replicator);
        } else {
            // Lost the race to a concurrent call; tear the duplicate down
            let mut duplicate = replicator;
            duplicate.stop();
        }
        Ok(())
    }

    /// Identifiers of currently connected peers.
    pub fn connected_peers(&self) -> Vec<DeviceId> {
        self.replicator
            .read()
            .unwrap()
            .as_ref()
            .map(|r| r.connected_peers())
            .unwrap_or_default()
    }

    /// Port the replicator is listening on, once enabled.
    pub fn replication_port(&self) -> Option<u16> {
        self.replicator.read().unwrap().as_ref().map(|r| r.local_port())
    }

    /// Stop the event task and replication, close the watcher and the
    /// catalog. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(device = %self.device_id, "sync engine closing");
        self.cancel.cancel();
        if let Some(mut replicator) = self.replicator.write().unwrap().take() {
            replicator.stop();
        }
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.close();
        }
        self.ingestor.catalog.close();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn load_or_create_device_id(path: &Path) -> SyncResult<DeviceId> {
    if let Ok(contents) = fs::read_to_string(path) {
        let trimmed = contents.trim();
        if !trimmed.is_empty() {
            return Ok(DeviceId::new(trimmed));
        }
    }
    let id = DeviceId::generate();
    fs::write(path, id.as_str())?;
    Ok(id)
}

/// Drain watcher events in arrival order. Ingest work runs on the blocking
/// pool; a per-file failure is logged and never kills the task.
async fn event_loop(
    ingestor: Arc<Ingestor>,
    replicator: Arc<RwLock<Option<Replicator>>>,
    mut events: mpsc::Receiver<FileEvent>,
    mut errors: mpsc::Receiver<WatcherError>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_event(&ingestor, &replicator, event).await,
                None => break,
            },
            error = errors.recv() => match error {
                Some(error) => warn!(error = %error, "watcher error"),
                None => break,
            }
        }
    }
    debug!("event loop stopped");
}

async fn handle_event(
    ingestor: &Arc<Ingestor>,
    replicator: &Arc<RwLock<Option<Replicator>>>,
    event: FileEvent,
) {
    match event.op {
        FileOp::Create | FileOp::Write => {
            let ing = ingestor.clone();
            let path = event.path.clone();
            match spawn_blocking(move || ing.ingest_path(&path)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(path = %event.path.display(), error = %e, "ingest failed")
                }
                Err(e) => warn!(error = %e, "ingest task failed"),
            }
        }
        FileOp::Remove | FileOp::Rename => {
            let ing = ingestor.clone();
            let path = event.path.clone();
            match spawn_blocking(move || ing.remove_path(&path)).await {
                Ok(Ok(Some((rel, version)))) => {
                    let shared = {
                        let slot = replicator.read().unwrap();
                        slot.as_ref().map(|r| r.shared.clone())
                    };
                    if let Some(shared) = shared {
                        shared.broadcast_delete(rel, version).await;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(path = %event.path.display(), error = %e, "delete failed")
                }
                Err(e) => warn!(error = %e, "delete task failed"),
            }
        }
    }
}
