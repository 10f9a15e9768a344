// SPDX-License-Identifier: Apache-2.0

//! Traits and types shared by the directory watch backends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("watcher initialization failed: {0}")]
    Init(String),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

/// A source of "a file appeared in the directory" notifications.
///
/// Implementations report paths that were created in, or renamed into, the
/// watched directory. Subdirectories are never descended into.
pub trait DirectoryWatcher {
    /// Start watching `dir`, non-recursively.
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError>;

    /// Block until at least one path appears or the timeout expires.
    ///
    /// Returns an empty vector on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<PathBuf>, WatcherError>;

    /// Backend errors reported in a row, reset by any delivered event.
    fn consecutive_errors(&self) -> usize {
        0
    }

    /// Returns true for inotify/kqueue/FSEvents watchers, false for polling.
    fn is_native(&self) -> bool;

    /// Name of the backend, for logging.
    fn backend_name(&self) -> &'static str;
}
