// SPDX-License-Identifier: Apache-2.0

//! The tailing loop and the per-monitor worker that drives it.
//!
//! A monitor tails one file at a time, in the order files come out of the
//! discovery queue. A session on a historical file ends at its first end of
//! stream; a session on the active file waits for more data until the file is
//! rotated away or the monitor is cancelled.

use std::path::PathBuf;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::processor::{LineProcessor, Step};
use crate::tailer::checkpoint::{CheckpointConfig, Checkpointer};
use crate::tailer::error::{Result, TailError};
use crate::tailer::file_id::FileId;
use crate::tailer::reader::TailingReader;
use crate::tailer::registry::Registry;
use crate::tailer::watcher::WatcherConfig;

/// How a tailing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A historical file was read to its end
    Drained,
    /// The file could not be opened or read
    Failed,
    /// The monitor is shutting down
    Cancelled,
}

/// Tail the file `id` until its session ends.
///
/// Each successful processing step records the reader's offset in the
/// registry, which marks it dirty. The file is closed on every exit path.
pub async fn tail_file<P: LineProcessor>(
    registry: &Registry,
    id: FileId,
    processor: &mut P,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> SessionEnd {
    let Some(record) = registry.record(&id) else {
        warn!(file_id = %id, "Discovered file is no longer tracked");
        return SessionEnd::Failed;
    };

    let mut reader = match TailingReader::open(&record).await {
        Ok(reader) => reader,
        Err(e) => {
            error!(file_id = %id, error = %e, "Failed to open log file");
            return SessionEnd::Failed;
        }
    };

    let mut active = record.file_name() == Some(registry.active_name());
    info!(
        path = ?record.path,
        file_id = %id,
        offset = record.offset,
        active,
        "Tailing log file"
    );

    loop {
        let result = select! {
            biased;

            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            result = processor.process(&mut reader) => result,
        };

        match result {
            Ok(step) => {
                registry.set_offset(&id, reader.offset());
                match step {
                    Step::Pending => trace!(file_id = %id, "Unit pending"),
                    Step::Quiet => trace!(file_id = %id, offset = reader.offset(), "Unit consumed"),
                    Step::Delivered => debug!(file_id = %id, offset = reader.offset(), "Unit delivered"),
                    Step::DeliveryFailed => {
                        debug!(file_id = %id, offset = reader.offset(), "Unit consumed, delivery failed")
                    }
                }
            }
            Err(TailError::EndOfStream) if active => {
                if rotated_away(registry, id) {
                    // Read whatever was written before the rotation, then finish
                    info!(path = ?reader.path(), file_id = %id, "Active log file was rotated");
                    active = false;
                    continue;
                }

                select! {
                    biased;

                    _ = cancel.cancelled() => return SessionEnd::Cancelled,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(TailError::EndOfStream) => {
                info!(
                    path = ?reader.path(),
                    file_id = %id,
                    offset = reader.offset(),
                    "Finished log file"
                );
                return SessionEnd::Drained;
            }
            Err(e) => {
                error!(file_id = %id, offset = reader.offset(), error = %e, "Stopped tailing log file");
                return SessionEnd::Failed;
            }
        }
    }
}

/// True when the active path now names a different file than `id`.
fn rotated_away(registry: &Registry, id: FileId) -> bool {
    match FileId::from_path(registry.active_path()) {
        Ok(current) => current != id,
        // Renamed away and not recreated yet
        Err(_) => false,
    }
}

/// Drain the discovery queue one file at a time until cancelled.
pub async fn run_tail_loop<P: LineProcessor>(
    registry: Registry,
    mut queue: BoundedReceiver<FileId>,
    mut processor: P,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let id = select! {
            biased;

            _ = cancel.cancelled() => break,
            id = queue.next() => match id {
                Some(id) => id,
                None => break,
            },
        };

        let end = tail_file(&registry, id, &mut processor, poll_interval, &cancel).await;
        if end == SessionEnd::Cancelled {
            break;
        }
    }

    debug!(dir = ?registry.directory(), "Tail loop stopped");
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Path of the active log file
    pub log_file: PathBuf,
    /// Path of the registry snapshot
    pub registry_path: PathBuf,
    /// Wait between end-of-stream retries on the active file
    pub poll_interval: Duration,
    pub checkpoint_interval: Duration,
    pub watcher: WatcherConfig,
}

/// One monitored log file: its registry, watcher, checkpointer and tail loop.
pub struct Monitor {
    config: MonitorConfig,
    registry: Registry,
    queue: BoundedReceiver<FileId>,
}

impl Monitor {
    /// Build the registry for the monitored log file. Fails if the registry
    /// cannot be loaded, the directory cannot be scanned or the merged state
    /// cannot be saved.
    pub fn open(config: MonitorConfig) -> Result<Self> {
        let (registry, queue) = Registry::open(&config.registry_path, &config.log_file)?;
        Ok(Self {
            config,
            registry,
            queue,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run until `cancel` fires.
    ///
    /// Fails without tailing anything if the directory watch cannot be set
    /// up. The registry is saved a final time after the tail loop stops.
    pub async fn run<P: LineProcessor>(self, processor: P, cancel: CancellationToken) -> Result<()> {
        let Monitor {
            config,
            registry,
            queue,
        } = self;

        let watcher = registry.watch(config.watcher.clone(), cancel.clone())?;

        let checkpoint_stop = CancellationToken::new();
        let mut checkpointer = Checkpointer::new(
            registry.clone(),
            CheckpointConfig {
                interval: config.checkpoint_interval,
                ..Default::default()
            },
        );
        let mut checkpoint = tokio::spawn({
            let stop = checkpoint_stop.clone();
            async move { checkpointer.run(stop).await }
        });

        info!(log_file = ?config.log_file, "Monitor started");
        let ended_early = select! {
            _ = run_tail_loop(
                registry.clone(),
                queue,
                processor,
                config.poll_interval,
                cancel.clone(),
            ) => None,
            // Persistent checkpoint failures end the monitor
            joined = &mut checkpoint => Some(joined),
        };

        checkpoint_stop.cancel();
        let joined = match ended_early {
            Some(joined) => joined,
            None => checkpoint.await,
        };

        // The checkpointer closes the registry, which also stops the watcher
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Checkpoint task failed");
                registry.close()
            }
        };

        if tokio::task::spawn_blocking(move || watcher.join()).await.is_err() {
            warn!(log_file = ?config.log_file, "Directory watcher thread panicked");
        }

        info!(log_file = ?config.log_file, "Monitor stopped");
        result
    }
}
