//! The replicator: symmetric peer-to-peer reconciliation over a framed
//! transport.
//!
//! Every device simultaneously listens for inbound connections and dials
//! its configured peers. Each connection is owned by a pair of tasks — a
//! reader that decodes and dispatches frames, and a writer that drains a
//! per-connection channel — so no callback slots and no shared stream
//! locks. Reconciliation is last-writer-wins by version on whole files.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fybrk_types::{Device, DeviceId, DeviceProfile, FileMetadata};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::ingest::Ingestor;
use crate::protocol::{
    FileDelete, FileDeletePayload, FileListPayload, FileRequest, FileRequestPayload,
    FileResponse, FileResponsePayload, SyncMessage, SyncPayload,
};
use crate::transport::{Connection, Listener, Transport};

/// Outgoing queue depth per connection.
const OUTGOING_CAPACITY: usize = 32;

/// A connected peer. The per-peer state machine is implicit: an address in
/// `active_addrs` without a peer entry is Connecting, an entry here is
/// Connected, and everything else is Disconnected.
struct PeerHandle {
    outgoing: mpsc::Sender<SyncMessage>,
    /// Identifies which connection task owns this entry, so a stale task
    /// tearing down cannot evict a newer connection.
    conn_id: u64,
}

/// Decide whether a remote announcement warrants a `file_request`.
///
/// Request iff the path is locally absent or the remote version is
/// strictly newer. An equal-version, different-hash pair is an unresolved
/// divergence: the local copy stands.
pub(crate) fn needs_request(local: Option<&FileMetadata>, remote: &FileMetadata) -> bool {
    match local {
        None => true,
        Some(local) => local.version < remote.version,
    }
}

pub(crate) struct Replicator {
    pub(crate) shared: Arc<ReplicatorShared>,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct ReplicatorShared {
    device_id: DeviceId,
    ingestor: Arc<Ingestor>,
    config: EngineConfig,
    cancel: CancellationToken,
    peers: RwLock<HashMap<DeviceId, PeerHandle>>,
    /// Outstanding `file_request`s keyed by (peer, path); the stored
    /// metadata is what the response is verified against and the version
    /// the applied file inherits. Cleared per peer on disconnect.
    pending: Mutex<HashMap<(DeviceId, String), FileMetadata>>,
    /// Outbound addresses with a live dial or connection.
    active_addrs: Mutex<HashSet<String>>,
    conn_counter: AtomicU64,
    local_port: u16,
}

impl Replicator {
    /// Bind the listener and spawn the acceptor, connector, and
    /// broadcaster tasks.
    pub(crate) async fn start(
        device_id: DeviceId,
        ingestor: Arc<Ingestor>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        cancel: CancellationToken,
        port: u16,
    ) -> SyncResult<Self> {
        let listener = transport.listen(port).await?;
        let local_port = listener.local_port();

        let shared = Arc::new(ReplicatorShared {
            device_id,
            ingestor,
            config,
            cancel,
            peers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            active_addrs: Mutex::new(HashSet::new()),
            conn_counter: AtomicU64::new(0),
            local_port,
        });

        info!(port = local_port, "replication enabled");

        let tasks = vec![
            tokio::spawn(accept_loop(shared.clone(), listener)),
            tokio::spawn(connect_loop(shared.clone(), transport)),
            tokio::spawn(broadcast_loop(shared.clone())),
        ];

        Ok(Self { shared, tasks })
    }

    pub(crate) fn local_port(&self) -> u16 {
        self.shared.local_port
    }

    pub(crate) fn connected_peers(&self) -> Vec<DeviceId> {
        let peers = self.shared.peers.read().unwrap();
        peers.keys().cloned().collect()
    }

    /// Abort the long-lived tasks. Connection tasks unwind through the
    /// shared cancellation token.
    pub(crate) fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl ReplicatorShared {
    fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Broadcast a message to every connected peer.
    async fn broadcast(&self, payload: SyncPayload) {
        let message = SyncMessage::new(self.device_id.clone(), payload);
        let targets: Vec<(DeviceId, mpsc::Sender<SyncMessage>)> = {
            let peers = self.peers.read().unwrap();
            peers
                .iter()
                .map(|(id, handle)| (id.clone(), handle.outgoing.clone()))
                .collect()
        };
        for (peer, sender) in targets {
            if sender.send(message.clone()).await.is_err() {
                debug!(peer = %peer, "broadcast target gone");
            }
        }
    }

    /// Broadcast the full catalog as a `file_list`.
    pub(crate) async fn broadcast_file_list(&self) {
        match self.load_file_list().await {
            Ok(payload) => self.broadcast(SyncPayload::FileList(payload)).await,
            Err(e) => warn!(error = %e, "cannot build file list"),
        }
    }

    /// Broadcast a `file_delete` for a locally removed path.
    pub(crate) async fn broadcast_delete(&self, path: String, version: i64) {
        self.broadcast(SyncPayload::FileDelete(FileDeletePayload {
            delete: FileDelete { path, version },
        }))
        .await;
    }

    async fn load_file_list(&self) -> SyncResult<FileListPayload> {
        let ingestor = self.ingestor.clone();
        let files = spawn_blocking(move || ingestor.catalog.list())
            .await
            .map_err(|_| SyncError::ChannelClosed)??;
        Ok(FileListPayload { files })
    }

    fn peer_connected(
        &self,
        peer: &DeviceId,
        outgoing: mpsc::Sender<SyncMessage>,
        conn_id: u64,
    ) {
        let mut peers = self.peers.write().unwrap();
        peers.insert(peer.clone(), PeerHandle { outgoing, conn_id });
        info!(peer = %peer, "peer connected");
    }

    fn peer_disconnected(&self, peer: &DeviceId, conn_id: u64) {
        let mut peers = self.peers.write().unwrap();
        let owned = peers
            .get(peer)
            .map(|handle| handle.conn_id == conn_id)
            .unwrap_or(false);
        if owned {
            peers.remove(peer);
            info!(peer = %peer, "peer disconnected");
        }
        drop(peers);

        // Cancel in-flight requests toward this peer
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|(id, _), _| id != peer);
    }

    /// Record the sender in the device table for bookkeeping.
    async fn touch_device(&self, peer: &DeviceId) {
        let ingestor = self.ingestor.clone();
        let device = Device {
            id: peer.clone(),
            name: String::new(),
            profile: DeviceProfile::FullReplica,
            last_seen: Utc::now(),
        };
        let result = spawn_blocking(move || ingestor.catalog.put_device(&device)).await;
        if let Ok(Err(e)) = result {
            warn!(peer = %peer, error = %e, "device bookkeeping failed");
        }
    }

    /// Decode and dispatch one inbound frame.
    async fn handle_frame(
        &self,
        frame: &[u8],
        peer_addr: &str,
        outgoing: &mpsc::Sender<SyncMessage>,
        identified: &mut Option<DeviceId>,
        conn_id: u64,
    ) {
        let message = match SyncMessage::from_bytes(frame) {
            Ok(message) => message,
            Err(e @ SyncError::ProtocolVersion { .. }) => {
                warn!(peer = %peer_addr, error = %e, "rejecting message");
                return;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "discarding malformed message");
                return;
            }
        };

        if message.device_id == self.device_id {
            return;
        }

        if identified.as_ref() != Some(&message.device_id) {
            *identified = Some(message.device_id.clone());
            self.peer_connected(&message.device_id, outgoing.clone(), conn_id);
            self.touch_device(&message.device_id).await;
        }

        let from = message.device_id;
        match message.payload {
            SyncPayload::FileList(payload) => {
                self.touch_device(&from).await;
                self.handle_file_list(&from, payload.files, outgoing).await;
            }
            SyncPayload::FileRequest(payload) => {
                self.handle_file_request(&from, payload.request, outgoing)
                    .await;
            }
            SyncPayload::FileResponse(payload) => {
                self.handle_file_response(&from, payload.response).await;
            }
            SyncPayload::FileDelete(payload) => {
                self.handle_file_delete(&from, payload.delete).await;
            }
        }
    }

    async fn handle_file_list(
        &self,
        from: &DeviceId,
        remote_files: Vec<FileMetadata>,
        outgoing: &mpsc::Sender<SyncMessage>,
    ) {
        let local = match self.load_file_list().await {
            Ok(payload) => payload.files,
            Err(e) => {
                warn!(error = %e, "cannot read local catalog for reconciliation");
                return;
            }
        };
        let local_by_path: HashMap<&str, &FileMetadata> =
            local.iter().map(|meta| (meta.path.as_str(), meta)).collect();

        for remote in remote_files {
            let local_meta = local_by_path.get(remote.path.as_str()).copied();
            if needs_request(local_meta, &remote) {
                debug!(
                    peer = %from,
                    path = %remote.path,
                    remote_version = remote.version,
                    "requesting file"
                );
                let request = SyncMessage::new(
                    self.device_id.clone(),
                    SyncPayload::FileRequest(FileRequestPayload {
                        request: FileRequest {
                            path: remote.path.clone(),
                            chunks: remote.chunks.clone(),
                        },
                    }),
                );
                self.pending
                    .lock()
                    .unwrap()
                    .insert((from.clone(), remote.path.clone()), remote);
                if outgoing.send(request).await.is_err() {
                    return;
                }
            } else if let Some(local_meta) = local_meta {
                if local_meta.version == remote.version && local_meta.hash != remote.hash {
                    warn!(
                        peer = %from,
                        path = %remote.path,
                        version = remote.version,
                        "unresolved divergence: equal version, differing content"
                    );
                }
            }
        }
    }

    async fn handle_file_request(
        &self,
        from: &DeviceId,
        request: FileRequest,
        outgoing: &mpsc::Sender<SyncMessage>,
    ) {
        let ingestor = self.ingestor.clone();
        let path = request.path.clone();
        let result = spawn_blocking(move || ingestor.sealed_chunks(&path)).await;
        let chunks = match result {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!(peer = %from, path = %request.path, error = %e, "cannot serve file request");
                return;
            }
            Err(e) => {
                warn!(error = %e, "file request task failed");
                return;
            }
        };

        debug!(peer = %from, path = %request.path, chunks = chunks.len(), "serving file");
        let response = SyncMessage::new(
            self.device_id.clone(),
            SyncPayload::FileResponse(FileResponsePayload {
                response: FileResponse {
                    path: request.path,
                    chunks,
                },
            }),
        );
        let _ = outgoing.send(response).await;
    }

    async fn handle_file_response(&self, from: &DeviceId, response: FileResponse) {
        let Some(remote) = self
            .pending
            .lock()
            .unwrap()
            .remove(&(from.clone(), response.path.clone()))
        else {
            warn!(peer = %from, path = %response.path, "unsolicited file_response");
            return;
        };

        // Unsealed chunks are never accepted over the wire
        if response.chunks.iter().any(|chunk| !chunk.encrypted) {
            warn!(peer = %from, path = %response.path, "response carries unsealed chunks");
            return;
        }

        let ingestor = self.ingestor.clone();
        let path = response.path.clone();
        let result =
            spawn_blocking(move || ingestor.apply_remote_file(&remote, response.chunks)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(peer = %from, path = %path, error = %e, "dropping file_response"),
            Err(e) => warn!(error = %e, "apply task failed"),
        }
    }

    async fn handle_file_delete(&self, from: &DeviceId, delete: FileDelete) {
        let ingestor = self.ingestor.clone();
        let path = delete.path.clone();
        let result =
            spawn_blocking(move || ingestor.apply_remote_delete(&delete.path, delete.version))
                .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(peer = %from, path = %path, error = %e, "ignoring file_delete"),
            Err(e) => warn!(error = %e, "delete task failed"),
        }
    }
}

async fn accept_loop(shared: Arc<ReplicatorShared>, mut listener: Box<dyn Listener>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(connection) => {
                    debug!(peer = %connection.peer_addr, "accepted connection");
                    tokio::spawn(run_connection(shared.clone(), connection, None));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    // Back off so a persistent listener failure cannot spin
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn connect_loop(shared: Arc<ReplicatorShared>, transport: Arc<dyn Transport>) {
    let mut interval = tokio::time::interval(shared.config.reconnect_interval);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => {
                let addrs: Vec<String> = {
                    let active = shared.active_addrs.lock().unwrap();
                    shared
                        .config
                        .peer_addrs
                        .iter()
                        .filter(|addr| !active.contains(*addr))
                        .cloned()
                        .collect()
                };
                for addr in addrs {
                    shared.active_addrs.lock().unwrap().insert(addr.clone());
                    match transport.dial(&addr).await {
                        Ok(connection) => {
                            debug!(peer = %addr, "dialed peer");
                            tokio::spawn(run_connection(
                                shared.clone(),
                                connection,
                                Some(addr),
                            ));
                        }
                        Err(e) => {
                            // Failed dials are silent; the next tick retries
                            debug!(peer = %addr, error = %e, "dial failed");
                            shared.active_addrs.lock().unwrap().remove(&addr);
                        }
                    }
                }
            }
        }
    }
}

async fn broadcast_loop(shared: Arc<ReplicatorShared>) {
    let mut interval = tokio::time::interval(shared.config.broadcast_interval);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => shared.broadcast_file_list().await,
        }
    }
}

/// Drive one peer connection: a writer task drains the outgoing channel
/// while this task reads, decodes, and dispatches frames. The peer is
/// identified by the device id on its first message.
async fn run_connection(
    shared: Arc<ReplicatorShared>,
    connection: Connection,
    dialed_addr: Option<String>,
) {
    let conn_id = shared.next_conn_id();
    let Connection {
        peer_addr,
        mut sink,
        mut source,
    } = connection;

    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SyncMessage>(OUTGOING_CAPACITY);
    let writer_cancel = shared.cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                message = outgoing_rx.recv() => {
                    let Some(message) = message else { break };
                    let bytes = match message.to_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(error = %e, "cannot encode message");
                            continue;
                        }
                    };
                    if sink.send(&bytes).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // On entering Connected, announce the catalog
    match shared.load_file_list().await {
        Ok(payload) => {
            let hello =
                SyncMessage::new(shared.device_id.clone(), SyncPayload::FileList(payload));
            let _ = outgoing_tx.send(hello).await;
        }
        Err(e) => warn!(error = %e, "cannot send initial file list"),
    }

    let mut identified: Option<DeviceId> = None;
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = source.recv() => match result {
                Ok(Some(frame)) => {
                    shared
                        .handle_frame(&frame, &peer_addr, &outgoing_tx, &mut identified, conn_id)
                        .await;
                }
                Ok(None) => {
                    debug!(peer = %peer_addr, "connection closed");
                    break;
                }
                Err(e) => {
                    debug!(peer = %peer_addr, error = %e, "connection error");
                    break;
                }
            }
        }
    }

    writer.abort();
    if let Some(peer) = identified {
        shared.peer_disconnected(&peer, conn_id);
    }
    if let Some(addr) = dialed_addr {
        shared.active_addrs.lock().unwrap().remove(&addr);
    }
}
