//! Snapshot persistence: the on-disk document and the background saver.
//!
//! One JSON document per shard, `{"store": [[key, value]…], "expiry":
//! [[key, absoluteMillis]…]}`. Saves go through a temp file in the same
//! directory followed by a rename, so readers only ever observe a complete
//! document. A file that fails to parse is treated as a missing snapshot:
//! logged, then ignored, never a startup failure.
//!
//! The [`Snapshotter`] owns the file. It saves on a periodic tick and on
//! demand; on-demand requests land in a capacity-1 channel so bursts
//! coalesce into one save, and saves never overlap because the worker
//! processes them sequentially. File I/O runs on the blocking pool, off the
//! operation path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kvgrid_core::types::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SnapshotError;

use super::store::Store;

/// The on-disk snapshot document. Unknown fields are ignored and missing
/// arrays default to empty, so the format can grow without breaking old
/// readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Entries as `[key, value]` pairs.
    #[serde(default)]
    pub store: Vec<(String, Value)>,
    /// Absolute expirations as `[key, millis]` pairs.
    #[serde(default)]
    pub expiry: Vec<(String, i64)>,
}

impl SnapshotDocument {
    /// Builds the document from a store's extracted state.
    #[must_use]
    pub fn from_state(store: Vec<(String, Value)>, expiry: Vec<(String, i64)>) -> Self {
        Self { store, expiry }
    }
}

/// Writes `document` to `path` atomically (temp file + rename).
///
/// # Errors
///
/// Returns [`SnapshotError::Io`] on filesystem failures. Serialization of
/// the document itself cannot fail for the types involved.
pub fn save_atomic(path: &Path, document: &SnapshotDocument) -> Result<(), SnapshotError> {
    let json = serde_json::to_vec(document).map_err(SnapshotError::Corrupt)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a snapshot from `path`.
///
/// # Errors
///
/// Returns [`SnapshotError::Io`] when the file cannot be read and
/// [`SnapshotError::Corrupt`] when it does not parse. A missing file is not
/// an error: it returns `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<SnapshotDocument>, SnapshotError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let document = serde_json::from_slice(&bytes).map_err(SnapshotError::Corrupt)?;
    Ok(Some(document))
}

/// Reads a snapshot, treating corruption and I/O failures as a missing
/// snapshot after logging them. Startup recovery goes through here.
#[must_use]
pub fn load_or_default(path: &Path) -> SnapshotDocument {
    match load(path) {
        Ok(Some(document)) => document,
        Ok(None) => SnapshotDocument::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot");
            SnapshotDocument::default()
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("snapshot"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

/// Background saver for one store's snapshot file.
pub struct Snapshotter {
    request_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Snapshotter {
    /// Spawns the saver task: saves every `interval`, on every
    /// [`Self::request_save`], and once more on shutdown.
    #[must_use]
    pub fn spawn(
        store: Arc<Store>,
        path: PathBuf,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        // Capacity 1: a request while one is already queued coalesces.
        let (request_tx, mut request_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of `interval` fires immediately; skip it so an
            // empty store does not clobber an existing snapshot before
            // recovery has run.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => save_once(&store, &path).await,
                    Some(()) = request_rx.recv() => save_once(&store, &path).await,
                    _ = shutdown.changed() => {
                        save_once(&store, &path).await;
                        debug!(store = %store.name(), "snapshotter stopping");
                        break;
                    }
                }
            }
        });
        Self { request_tx, handle }
    }

    /// Requests a save. Returns immediately; concurrent requests coalesce.
    pub fn request_save(&self) {
        // Full channel means a save is already pending.
        let _ = self.request_tx.try_send(());
    }

    /// Waits for the saver task to finish (after shutdown has been
    /// signalled).
    ///
    /// # Errors
    ///
    /// Returns the task's join error if it panicked.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.handle.await
    }
}

async fn save_once(store: &Arc<Store>, path: &Path) {
    let (entries, expiry) = store.snapshot_state();
    let document = SnapshotDocument::from_state(entries, expiry);
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || save_atomic(&path, &document)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(store = %store.name(), error = %e, "snapshot save failed"),
        Err(e) => warn!(store = %store.name(), error = %e, "snapshot task failed"),
    }
}

/// Restores `store` from its snapshot file, if one exists. Entries whose
/// expiration passed while the process was down are discarded.
pub fn recover(store: &Store, path: &Path) {
    let document = load_or_default(path);
    if document.store.is_empty() {
        return;
    }
    let count = document.store.len();
    store.restore(document.store, document.expiry);
    debug!(store = %store.name(), entries = count, "snapshot recovered");
}
