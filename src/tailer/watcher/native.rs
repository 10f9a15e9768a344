// SPDX-License-Identifier: Apache-2.0

//! Native directory watcher using the `notify` crate.
//!
//! Uses OS-level notifications: inotify on Linux, FSEvents on macOS.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use super::traits::{DirectoryWatcher, WatcherError};

pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<Result<Event, notify::Error>>,
    /// Errors reported by the backend since the last successful event
    consecutive_errors: usize,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            receiver: rx,
            consecutive_errors: 0,
        })
    }

    /// Paths that newly appeared under their current name.
    fn appeared_paths(event: Event) -> Vec<PathBuf> {
        match event.kind {
            EventKind::Create(_) => event.paths,
            // A rename reports [from, to]; only the destination is new
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.into_iter().last().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn handle(&mut self, res: Result<Event, notify::Error>, paths: &mut Vec<PathBuf>) {
        match res {
            Ok(event) => {
                self.consecutive_errors = 0;
                paths.extend(Self::appeared_paths(event));
            }
            Err(e) => {
                self.consecutive_errors += 1;
                warn!(error = %e, "Directory watcher error");
            }
        }
    }
}

impl DirectoryWatcher for NativeWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(e.to_string()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<PathBuf>, WatcherError> {
        let mut paths = Vec::new();

        match self.receiver.recv_timeout(timeout) {
            Ok(res) => self.handle(res, &mut paths),
            Err(RecvTimeoutError::Timeout) => return Ok(paths),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WatcherError::Channel("watcher channel disconnected".into()));
            }
        }

        // Drain whatever else is already queued
        loop {
            match self.receiver.try_recv() {
                Ok(res) => self.handle(res, &mut paths),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(WatcherError::Channel("watcher channel disconnected".into()));
                }
            }
        }

        Ok(paths)
    }

    fn consecutive_errors(&self) -> usize {
        self.consecutive_errors
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            "native"
        }
    }
}
