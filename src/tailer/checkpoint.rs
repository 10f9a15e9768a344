// SPDX-License-Identifier: Apache-2.0

//! Periodic registry persistence.
//!
//! Offsets advance in memory as the tailing loop consumes units; this task
//! writes them out every interval. It is stopped only after the tailing loop
//! has exited, so the final checkpoint covers every consumed unit.

use std::time::{Duration, Instant};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tailer::error::Result;
use crate::tailer::registry::Registry;

pub struct CheckpointConfig {
    /// Interval between periodic saves
    pub interval: Duration,
    /// Maximum duration of consecutive save failures before giving up
    pub max_failure_duration: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_failure_duration: Duration::from_secs(60),
        }
    }
}

pub struct Checkpointer {
    registry: Registry,
    config: CheckpointConfig,
    first_failure: Option<Instant>,
}

impl Checkpointer {
    pub fn new(registry: Registry, config: CheckpointConfig) -> Self {
        Self {
            registry,
            config,
            first_failure: None,
        }
    }

    /// Save every interval until `stop` fires, then close the registry with a
    /// final save.
    ///
    /// Returns an error if saves keep failing past the configured threshold,
    /// or if the final save fails.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        // The first tick completes immediately and the registry was just saved
        ticker.tick().await;

        let mut fatal_error = None;

        loop {
            select! {
                biased;

                _ = stop.cancelled() => {
                    debug!(registry = ?self.registry.registry_path(), "Checkpointer stopping");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.maybe_checkpoint() {
                        error!("Checkpoint failures persisted beyond threshold, exiting: {}", e);
                        fatal_error = Some(e);
                        break;
                    }
                }
            }
        }

        let final_save = self.registry.close();
        match &final_save {
            Ok(()) => info!(registry = ?self.registry.registry_path(), "Final checkpoint completed"),
            Err(e) => warn!("Failed to perform final checkpoint: {}", e),
        }

        match fatal_error {
            Some(e) => Err(e),
            None => final_save,
        }
    }

    /// Save and track failures. Returns Err only when failures have lasted
    /// longer than the configured threshold.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.registry.save() {
            Ok(()) => {
                if self.first_failure.take().is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                }
                Ok(())
            }
            Err(e) => {
                let first_failure = *self.first_failure.get_or_insert_with(Instant::now);
                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.config.max_failure_duration {
                    Err(e)
                } else {
                    warn!(
                        "Checkpoint failed (failures started {:?} ago): {}",
                        failure_duration, e
                    );
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailer::file_id::FileId;
    use crate::tailer::persistence::load_snapshot;
    use std::fs;
    use tempfile::TempDir;

    fn fast_config() -> CheckpointConfig {
        CheckpointConfig {
            interval: Duration::from_millis(20),
            max_failure_duration: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_periodic_save_persists_offsets() {
        let logs = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let registry_path = state.path().join("registry.json");
        let active = logs.path().join("app.log");
        fs::write(&active, "hello\n").unwrap();

        let (registry, _rx) = Registry::open(&registry_path, &active).unwrap();
        let id = FileId::from_path(&active).unwrap();

        let stop = CancellationToken::new();
        let mut checkpointer = Checkpointer::new(registry.clone(), fast_config());
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { checkpointer.run(stop).await }
        });

        registry.set_offset(&id, 6);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!registry.is_dirty());
        assert_eq!(load_snapshot(&registry_path).unwrap()[&id].offset, 6);

        stop.cancel();
        task.await.unwrap().unwrap();
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn test_stop_performs_final_save() {
        let logs = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let registry_path = state.path().join("registry.json");
        let active = logs.path().join("app.log");
        fs::write(&active, "hello\n").unwrap();

        let (registry, _rx) = Registry::open(&registry_path, &active).unwrap();
        let id = FileId::from_path(&active).unwrap();

        let config = CheckpointConfig {
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let mut checkpointer = Checkpointer::new(registry.clone(), config);
        let stop = CancellationToken::new();

        registry.set_offset(&id, 3);
        stop.cancel();
        checkpointer.run(stop).await.unwrap();

        assert_eq!(load_snapshot(&registry_path).unwrap()[&id].offset, 3);
    }

    #[tokio::test]
    async fn test_persistent_failures_end_the_checkpointer() {
        let logs = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let registry_path = state.path().join("registry.json");
        let active = logs.path().join("app.log");
        fs::write(&active, "hello\n").unwrap();

        let (registry, _rx) = Registry::open(&registry_path, &active).unwrap();

        // A non-empty directory in place of the snapshot makes every save fail
        fs::remove_file(&registry_path).unwrap();
        fs::create_dir(&registry_path).unwrap();
        fs::write(registry_path.join("keep"), "").unwrap();
        registry.mark_dirty();

        let mut checkpointer = Checkpointer::new(registry, fast_config());
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            checkpointer.run(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(result.is_err());
    }
}
