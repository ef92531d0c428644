//! Transport abstraction consumed by the replicator.
//!
//! The core needs a bidirectional, reliable, ordered byte stream with
//! framing at message boundaries; NAT traversal, pairing and discovery
//! live outside it. The production implementation is TCP with
//! line-delimited JSON frames. Tests substitute in-process transports.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{SyncError, SyncResult};

/// Write half of a framed connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &[u8]) -> SyncResult<()>;
}

/// Read half of a framed connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame; `None` on clean close.
    async fn recv(&mut self) -> SyncResult<Option<Vec<u8>>>;
}

/// A connected peer stream, split so reads and writes can run on
/// independent tasks.
pub struct Connection {
    pub peer_addr: String,
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Factory for listeners and outbound connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind a listener; port 0 asks the OS to choose.
    async fn listen(&self, port: u16) -> SyncResult<Box<dyn Listener>>;

    /// Dial a peer. Implementations apply their own dial timeout.
    async fn dial(&self, addr: &str) -> SyncResult<Connection>;
}

#[async_trait]
pub trait Listener: Send {
    fn local_port(&self) -> u16;

    async fn accept(&mut self) -> SyncResult<Connection>;
}

// ---------------------------------------------------------------------------
// TCP + JSON-lines implementation
// ---------------------------------------------------------------------------

/// TCP transport framing messages as newline-delimited JSON.
pub struct TcpTransport {
    dial_timeout: Duration,
}

impl TcpTransport {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, port: u16) -> SyncResult<Box<dyn Listener>> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| SyncError::Transport(format!("bind failed: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .port();
        Ok(Box::new(TcpAcceptor { listener, port }))
    }

    async fn dial(&self, addr: &str) -> SyncResult<Connection> {
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::Transport(format!("dial timed out: {addr}")))?
            .map_err(|e| SyncError::Transport(format!("dial {addr} failed: {e}")))?;
        Ok(split_stream(stream, addr.to_string()))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    port: u16,
}

#[async_trait]
impl Listener for TcpAcceptor {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> SyncResult<Connection> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| SyncError::Transport(format!("accept failed: {e}")))?;
        Ok(split_stream(stream, addr.to_string()))
    }
}

fn split_stream(stream: TcpStream, peer_addr: String) -> Connection {
    let (read, write) = stream.into_split();
    Connection {
        peer_addr,
        sink: Box::new(TcpSink { write }),
        source: Box::new(TcpSource {
            read: BufReader::new(read),
        }),
    }
}

struct TcpSink {
    write: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, frame: &[u8]) -> SyncResult<()> {
        self.write
            .write_all(frame)
            .await
            .map_err(|e| SyncError::TransportClosed(e.to_string()))?;
        self.write
            .write_all(b"\n")
            .await
            .map_err(|e| SyncError::TransportClosed(e.to_string()))?;
        self.write
            .flush()
            .await
            .map_err(|e| SyncError::TransportClosed(e.to_string()))?;
        Ok(())
    }
}

struct TcpSource {
    read: BufReader<OwnedReadHalf>,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn recv(&mut self) -> SyncResult<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        let n = self
            .read
            .read_until(b'\n', &mut frame)
            .await
            .map_err(|e| SyncError::TransportClosed(e.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        if frame.last() == Some(&b'\n') {
            frame.pop();
        }
        Ok(Some(frame))
    }
}
