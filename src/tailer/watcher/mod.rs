// SPDX-License-Identifier: Apache-2.0

//! Directory watch backends used to discover newly created log files.
//!
//! - **Native**: OS-level notifications (inotify, FSEvents) for immediate
//!   detection.
//! - **Poll**: periodic directory listing, for network filesystems where
//!   native notifications are unreliable, and as the degraded-mode fallback
//!   when the native backend keeps failing.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{DirectoryWatcher, WatcherError};

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Try native watching first, fall back to polling on failure.
    #[default]
    Auto,
    /// Force native watching. Fails if it is not supported.
    Native,
    /// Force polling.
    #[serde(alias = "polling")]
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub mode: WatchMode,
    /// Listing interval of the poll backend
    pub poll_interval: Duration,
    /// Consecutive native backend errors after which polling takes over
    pub error_threshold: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
            error_threshold: 3,
        }
    }
}

fn native_on(dir: &Path) -> Result<NativeWatcher, WatcherError> {
    let mut watcher = NativeWatcher::new()?;
    watcher.watch(dir)?;
    Ok(watcher)
}

/// Create a poll watcher already watching `dir`.
pub fn poll_watcher(
    config: &WatcherConfig,
    dir: &Path,
) -> Result<Box<dyn DirectoryWatcher + Send>, WatcherError> {
    let mut watcher = PollWatcher::new(config.poll_interval);
    watcher.watch(dir)?;
    Ok(Box::new(watcher))
}

/// Create a watcher for `dir` according to the configured mode.
///
/// In `Auto` mode a native watcher that fails to initialize or to watch the
/// directory is replaced by a poll watcher.
pub fn create_watcher(
    config: &WatcherConfig,
    dir: &Path,
) -> Result<Box<dyn DirectoryWatcher + Send>, WatcherError> {
    match config.mode {
        WatchMode::Native => Ok(Box::new(native_on(dir)?)),
        WatchMode::Poll => poll_watcher(config, dir),
        WatchMode::Auto => match native_on(dir) {
            Ok(watcher) => {
                tracing::info!(dir = ?dir, backend = watcher.backend_name(), "Using native directory watcher");
                Ok(Box::new(watcher))
            }
            Err(e) => {
                tracing::warn!(
                    dir = ?dir,
                    "Native directory watching unavailable ({}), falling back to polling",
                    e
                );
                poll_watcher(config, dir)
            }
        },
    }
}
