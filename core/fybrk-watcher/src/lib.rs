//! Filesystem event stream for a directory subtree.
//!
//! Wraps `notify`'s recommended platform watcher behind two bounded
//! channels: an event stream and a parallel error stream. When a channel is
//! full, new items are dropped silently — the sync engine tolerates event
//! loss and relies on periodic full scans to recover.
//!
//! Paths under the reserved `.fybrk` subtree, dotfiles, and editor
//! temporaries (`*~`) are filtered here, before they reach the engine.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

pub use fybrk_types::RESERVED_DIR;

/// Bounded capacity of the event channel.
pub const EVENT_CAPACITY: usize = 100;

/// Bounded capacity of the error channel.
pub const ERROR_CAPACITY: usize = 10;

/// Result type alias for watcher operations.
pub type WatcherResult<T> = Result<T, WatcherError>;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),
}

/// A filesystem operation observed on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Write,
    Remove,
    /// The path was renamed away. The matching `Create` for the new name
    /// arrives as a separate event.
    Rename,
}

/// One observed filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub op: FileOp,
}

/// Watches a directory subtree and emits an ordered stream of events.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    events: Option<mpsc::Receiver<FileEvent>>,
    errors: Option<mpsc::Receiver<WatcherError>>,
}

impl FileWatcher {
    pub fn new() -> WatcherResult<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CAPACITY);

        let watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => forward_event(&event_tx, event),
                Err(err) => {
                    // Full error channel: drop, same policy as events
                    let _ = error_tx.try_send(WatcherError::Notify(err));
                }
            },
        )?;

        Ok(Self {
            watcher,
            events: Some(event_rx),
            errors: Some(error_rx),
        })
    }

    /// Subscribe to `path`.
    ///
    /// Directories are watched recursively, including subdirectories
    /// created later. For a regular file, the containing directory is
    /// watched instead. Fails if the path does not exist.
    pub fn add(&mut self, path: &Path) -> WatcherResult<()> {
        let meta = std::fs::metadata(path)
            .map_err(|_| WatcherError::PathNotFound(path.to_path_buf()))?;
        if meta.is_dir() {
            self.watcher.watch(path, RecursiveMode::Recursive)?;
        } else {
            let dir = path.parent().unwrap_or(path);
            self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok(())
    }

    /// Unsubscribe from `path`.
    pub fn remove(&mut self, path: &Path) -> WatcherResult<()> {
        self.watcher.unwatch(path)?;
        Ok(())
    }

    /// Take the single-consumer event stream. Returns `None` once taken.
    pub fn events(&mut self) -> Option<mpsc::Receiver<FileEvent>> {
        self.events.take()
    }

    /// Take the single-consumer error stream. Returns `None` once taken.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<WatcherError>> {
        self.errors.take()
    }

    /// Stop watching and terminate both streams.
    pub fn close(self) {
        // Dropping the inner watcher stops its threads and closes the
        // channel senders, which ends both receivers.
    }
}

/// Whether a path is excluded from sync: inside the reserved directory, a
/// dotfile at basename level, or an editor temporary.
pub fn is_filtered(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == RESERVED_DIR)
    {
        return true;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with('.') || name.ends_with('~'),
        None => false,
    }
}

fn forward_event(tx: &mpsc::Sender<FileEvent>, event: notify::Event) {
    for (index, path) in event.paths.iter().enumerate() {
        let op = match &event.kind {
            // New directories are already covered by the recursive watch;
            // nothing to forward for them.
            EventKind::Create(CreateKind::Folder) => None,
            EventKind::Create(_) => Some(FileOp::Create),
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => Some(FileOp::Rename),
                RenameMode::To => Some(FileOp::Create),
                // Both: first path is the old name, second the new
                RenameMode::Both => {
                    if index == 0 {
                        Some(FileOp::Rename)
                    } else {
                        Some(FileOp::Create)
                    }
                }
                _ => Some(FileOp::Rename),
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(FileOp::Write),
            EventKind::Remove(_) => Some(FileOp::Remove),
            _ => None,
        };

        let Some(op) = op else { continue };
        if is_filtered(path) {
            continue;
        }
        // Directory-only create/write operations are dropped; removals
        // can no longer be stat'ed and pass through (deletes are
        // idempotent downstream).
        if matches!(op, FileOp::Create | FileOp::Write) && path.is_dir() {
            continue;
        }

        trace!(path = %path.display(), ?op, "file event");
        // Full channel: drop silently, periodic rescans recover
        let _ = tx.try_send(FileEvent {
            path: path.clone(),
            op,
        });
    }
}
