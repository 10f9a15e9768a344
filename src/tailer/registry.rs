// SPDX-License-Identifier: Apache-2.0

//! The registry of tracked files for one monitor.
//!
//! The registry owns the identity to record map and its on-disk snapshot. It
//! is cheap to clone; all clones share the same state. Every access to the
//! map goes through one mutex, so the watcher thread inserting discoveries
//! never races the tailing loop updating offsets.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, SendError, bounded};
use crate::tailer::error::{Error, Result};
use crate::tailer::file_id::FileId;
use crate::tailer::pattern::LogPattern;
use crate::tailer::persistence::{load_snapshot, store_snapshot};
use crate::tailer::record::FileRecord;
use crate::tailer::watcher::{DirectoryWatcher, WatcherConfig, create_watcher, poll_watcher};

/// Capacity of the discovery queue. One keeps tailing strictly sequential.
pub const DISCOVERY_QUEUE_CAPACITY: usize = 1;

/// How long the watcher thread blocks before re-checking for shutdown.
const WATCH_TICK: Duration = Duration::from_millis(100);

#[derive(Default)]
struct State {
    records: HashMap<FileId, FileRecord>,
    dirty: bool,
}

struct Inner {
    registry_path: PathBuf,
    dir: PathBuf,
    pattern: LogPattern,
    state: Mutex<State>,
    /// Serializes snapshot writes so an older snapshot never lands last
    save_lock: Mutex<()>,
    closed: AtomicBool,
    discoveries: BoundedSender<FileId>,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Build the registry for `log_file`: load the snapshot at
    /// `registry_path`, rescan the log directory, and persist the merged state.
    ///
    /// Returns the registry together with the receiving end of its discovery
    /// queue. Any failure here is fatal to the monitor.
    pub fn open(
        registry_path: impl AsRef<Path>,
        log_file: impl AsRef<Path>,
    ) -> Result<(Self, BoundedReceiver<FileId>)> {
        let log_file = log_file.as_ref();
        let name = log_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("invalid log file name: {:?}", log_file)))?;
        let dir = match log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let pattern = LogPattern::new(name)?;

        let (tx, rx) = bounded(DISCOVERY_QUEUE_CAPACITY);
        let registry = Self {
            inner: Arc::new(Inner {
                registry_path: registry_path.as_ref().to_path_buf(),
                dir,
                pattern,
                state: Mutex::new(State::default()),
                save_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
                discoveries: tx,
            }),
        };

        registry.load()?;
        registry.rescan()?;
        registry.save()?;

        info!(
            registry = ?registry.inner.registry_path,
            dir = ?registry.inner.dir,
            files = registry.len(),
            "Registry ready"
        );

        Ok((registry, rx))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the in-memory map with the persisted snapshot, if any.
    pub fn load(&self) -> Result<()> {
        let records = load_snapshot(&self.inner.registry_path)?;
        debug!(registry = ?self.inner.registry_path, records = records.len(), "Loaded registry");
        self.state().records = records;
        Ok(())
    }

    /// List the log directory and rebuild the map from the matching files.
    ///
    /// Offsets of identities already known are carried forward. Identities no
    /// longer on disk are dropped.
    pub fn rescan(&self) -> Result<()> {
        let entries = fs::read_dir(&self.inner.dir).map_err(|e| {
            Error::Discovery(format!("failed to list {:?}: {}", self.inner.dir, e))
        })?;

        let mut fresh = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::Discovery(format!("failed to list {:?}: {}", self.inner.dir, e))
            })?;

            // Does not follow symlinks, so links are skipped along with directories
            let file_type = entry.file_type().map_err(|e| {
                Error::Discovery(format!("failed to stat {:?}: {}", entry.path(), e))
            })?;
            if !file_type.is_file() {
                continue;
            }

            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }

            let record = match FileRecord::stat(&path) {
                Ok(record) => record,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = ?path, "File vanished during rescan");
                    continue;
                }
                Err(e) => {
                    return Err(Error::Discovery(format!(
                        "failed to stat {:?}: {}",
                        path, e
                    )));
                }
            };
            fresh.insert(record.file_id(), record);
        }

        let mut state = self.state();
        for (id, record) in fresh.iter_mut() {
            let Some(previous) = state.records.get(id) else {
                continue;
            };
            if previous.offset > record.size {
                warn!(
                    path = ?record.path,
                    offset = previous.offset,
                    size = record.size,
                    "File is shorter than its saved offset, reading from the start"
                );
                continue;
            }
            record.offset = previous.offset;
        }

        let dropped = state
            .records
            .keys()
            .filter(|id| !fresh.contains_key(id))
            .count();
        if dropped > 0 {
            debug!(dropped, "Dropped records of files no longer on disk");
        }

        state.records = fresh;
        state.dirty = true;
        Ok(())
    }

    /// Persist the map if anything changed since the last successful save.
    pub fn save(&self) -> Result<()> {
        let _guard = self
            .inner
            .save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot: Vec<FileRecord> = {
            let mut state = self.state();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.records.values().cloned().collect()
        };

        if let Err(e) = store_snapshot(&self.inner.registry_path, &snapshot) {
            self.mark_dirty();
            return Err(e);
        }

        debug!(registry = ?self.inner.registry_path, records = snapshot.len(), "Saved registry");
        Ok(())
    }

    pub fn mark_dirty(&self) {
        self.state().dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    /// Insert a newly observed file or refresh a known one.
    ///
    /// A known identity keeps its offset; only its path, size and timestamps
    /// change. Returns the identity when the file was not known before.
    pub fn add_or_update(&self, record: FileRecord) -> Option<FileId> {
        let id = record.file_id();
        let mut state = self.state();
        state.dirty = true;

        match state.records.get_mut(&id) {
            Some(known) => {
                known.refresh_from(&record);
                None
            }
            None => {
                let mut record = record;
                record.offset = 0;
                state.records.insert(id, record);
                Some(id)
            }
        }
    }

    /// Copy of the record for `id`.
    pub fn record(&self, id: &FileId) -> Option<FileRecord> {
        self.state().records.get(id).cloned()
    }

    /// Record consumption progress for `id` and mark the registry dirty.
    pub fn set_offset(&self, id: &FileId, offset: u64) {
        let mut state = self.state();
        if let Some(record) = state.records.get_mut(id) {
            record.offset = offset;
            state.dirty = true;
        }
    }

    /// All known records, oldest modification first.
    pub fn records(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.state().records.values().cloned().collect();
        records.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        records
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registry_path(&self) -> &Path {
        &self.inner.registry_path
    }

    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }

    /// Base name of the active log file.
    pub fn active_name(&self) -> &str {
        self.inner.pattern.active_name()
    }

    /// Path of the active log file.
    pub fn active_path(&self) -> PathBuf {
        self.inner.dir.join(self.inner.pattern.active_name())
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.inner.pattern.matches(name))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting discoveries and perform a final save.
    pub fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.save()
    }

    /// Start watching the log directory.
    ///
    /// The watcher thread lists the directory once more, replays every known
    /// record into the discovery queue, oldest first, then forwards newly
    /// created matching files. It exits when `cancel` fires or the registry is closed. Failing
    /// to set up the watch is fatal; failures afterwards only degrade
    /// discovery.
    pub fn watch(
        &self,
        config: WatcherConfig,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let watcher = create_watcher(&config, &self.inner.dir)
            .map_err(|e| Error::Watch(format!("failed to watch {:?}: {}", self.inner.dir, e)))?;

        let registry = self.clone();
        std::thread::Builder::new()
            .name("logwatch-watcher".to_string())
            .spawn(move || registry.run_watcher(watcher, config, cancel))
            .map_err(|e| Error::Watch(format!("failed to start watcher thread: {}", e)))
    }

    fn should_stop(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.is_closed()
    }

    /// Hand `id` to the tailing loop, waiting for queue capacity. Returns
    /// false when the watcher should stop.
    fn offer(&self, mut id: FileId, cancel: &CancellationToken) -> bool {
        loop {
            if self.should_stop(cancel) {
                return false;
            }
            match self.inner.discoveries.send_timeout(id, WATCH_TICK) {
                Ok(()) => return true,
                Err(SendError::Timeout(item)) => id = item,
                Err(SendError::Disconnected) => return false,
            }
        }
    }

    /// Stat a path reported by the watcher and register it if it matches.
    fn discover(&self, path: &Path) -> Option<FileId> {
        if !self.matches(path) {
            return None;
        }

        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return None,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to stat discovered file, skipping");
                return None;
            }
        }

        match FileRecord::stat(path) {
            Ok(record) => {
                let id = self.add_or_update(record);
                match id {
                    Some(id) => info!(path = ?path, file_id = %id, "Discovered new log file"),
                    None => debug!(path = ?path, "Refreshed known log file"),
                }
                id
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to stat discovered file, skipping");
                None
            }
        }
    }

    /// List the directory again once the watch is in place, so files created
    /// between the rescan and the watch are tracked and replayed.
    fn catch_up(&self) {
        let entries = match fs::read_dir(&self.inner.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = ?self.inner.dir, error = %e, "Failed to list directory after starting watch");
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();
        for path in paths {
            self.discover(&path);
        }
    }

    fn run_watcher(
        &self,
        watcher: Box<dyn DirectoryWatcher + Send>,
        config: WatcherConfig,
        cancel: CancellationToken,
    ) {
        self.catch_up();

        for record in self.records() {
            if !self.offer(record.file_id(), &cancel) {
                return;
            }
        }

        // None once discovery is degraded
        let mut watcher = Some(watcher);

        while !self.should_stop(&cancel) {
            let Some(active) = watcher.as_mut() else {
                std::thread::sleep(WATCH_TICK);
                continue;
            };

            let result = active.recv_timeout(WATCH_TICK);
            let failed_native = active.is_native()
                && (result.is_err() || active.consecutive_errors() >= config.error_threshold);

            match result {
                Ok(paths) => {
                    for path in paths {
                        if let Some(id) = self.discover(&path) {
                            if !self.offer(id, &cancel) {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(dir = ?self.inner.dir, error = %e, "Directory watcher failed");
                    if !failed_native {
                        std::thread::sleep(WATCH_TICK);
                    }
                }
            }

            if failed_native {
                watcher = match poll_watcher(&config, &self.inner.dir) {
                    Ok(poll) => {
                        warn!(dir = ?self.inner.dir, "Native directory watcher failing, switched to polling");
                        Some(poll)
                    }
                    Err(e) => {
                        error!(
                            dir = ?self.inner.dir,
                            error = %e,
                            "Directory watching unavailable, new files will not be detected"
                        );
                        None
                    }
                };
            }
        }

        debug!(dir = ?self.inner.dir, "Directory watcher stopped");
    }
}
