// SPDX-License-Identifier: Apache-2.0

//! Polling directory watcher, for filesystems where native notifications are
//! unavailable or unreliable (e.g. NFS), and as the degraded-mode fallback.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use super::traits::{DirectoryWatcher, WatcherError};
use crate::tailer::file_id::FileId;

/// Lists the watched directories every interval and reports paths that were
/// not present on the previous listing, or that now name a different file.
///
/// A rotation that renames `app.log` away and creates a new `app.log` leaves
/// the path unchanged, so paths are tracked together with their identity.
pub struct PollWatcher {
    watched_dirs: Vec<PathBuf>,
    known: HashMap<PathBuf, FileId>,
    poll_interval: Duration,
    last_poll: Instant,
}

impl PollWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            watched_dirs: Vec::new(),
            known: HashMap::new(),
            poll_interval,
            last_poll: Instant::now(),
        }
    }

    fn list(dir: &Path) -> Result<Vec<(PathBuf, FileId)>, WatcherError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)?.flatten() {
            // Does not follow symlinks
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            files.push((entry.path(), FileId::from_metadata(&metadata)));
        }
        Ok(files)
    }

    fn scan(&mut self) -> Result<Vec<PathBuf>, WatcherError> {
        let mut seen = HashMap::with_capacity(self.known.len());

        for dir in &self.watched_dirs {
            match Self::list(dir) {
                Ok(files) => seen.extend(files),
                Err(e) => {
                    debug!(dir = ?dir, error = %e, "Error scanning directory");
                    return Err(e);
                }
            }
        }

        let mut appeared: Vec<PathBuf> = seen
            .iter()
            .filter(|(path, id)| self.known.get(*path) != Some(*id))
            .map(|(path, _)| path.clone())
            .collect();
        appeared.sort();

        self.known = seen;
        self.last_poll = Instant::now();
        Ok(appeared)
    }
}

impl DirectoryWatcher for PollWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        let dir = dir.to_path_buf();
        if !fs::metadata(&dir)?.is_dir() {
            return Err(WatcherError::Watch(format!("{:?} is not a directory", dir)));
        }

        // Entries present when the watch starts are not reported
        for (path, id) in Self::list(&dir)? {
            if let Entry::Vacant(entry) = self.known.entry(path) {
                entry.insert(id);
            }
        }
        if !self.watched_dirs.contains(&dir) {
            self.watched_dirs.push(dir);
        }
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<PathBuf>, WatcherError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.last_poll.elapsed() >= self.poll_interval {
                let appeared = self.scan()?;
                if !appeared.is_empty() {
                    return Ok(appeared);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            // Sleep until next poll or timeout, whichever is sooner
            let time_to_next_poll = self.poll_interval.saturating_sub(self.last_poll.elapsed());
            let time_to_deadline = deadline.saturating_duration_since(Instant::now());
            let sleep_duration = time_to_next_poll.min(time_to_deadline);

            if !sleep_duration.is_zero() {
                std::thread::sleep(sleep_duration);
            }
        }
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}
