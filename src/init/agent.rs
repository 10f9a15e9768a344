// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

use crate::init::config::{Config, MonitorEntry};
use crate::init::wait::{self, TaskSet};
use crate::processor::Processor;
use crate::sink::{FeiShu, Notifier};
use crate::tailer::watcher::WatcherConfig;
use crate::tailer::{Monitor, MonitorConfig};

pub struct Agent {
    config: Config,
    shutdown_timeout: Duration,
}

impl Agent {
    pub fn new(config: Config, shutdown_timeout: Duration) -> Self {
        Self {
            config,
            shutdown_timeout,
        }
    }

    fn monitor_config(&self, entry: &MonitorEntry) -> MonitorConfig {
        MonitorConfig {
            log_file: entry.log_file.clone(),
            registry_path: entry.registry.clone(),
            poll_interval: self.config.poll_interval,
            checkpoint_interval: self.config.checkpoint_interval,
            watcher: WatcherConfig {
                mode: self.config.watch_mode,
                ..Default::default()
            },
        }
    }

    /// Open every configured monitor, then run them until `agent_cancel`
    /// fires or one of them fails.
    ///
    /// Any monitor failing to open aborts startup before tailing begins.
    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        info!("Starting logwatch.");

        let notifier: Arc<dyn Notifier> = Arc::new(FeiShu::new(self.config.webhook.feishu.clone())?);

        let mut monitors = Vec::with_capacity(self.config.monitor.len());
        for entry in &self.config.monitor {
            let monitor = Monitor::open(self.monitor_config(entry)).map_err(|e| {
                format!("failed to start monitor for {:?}: {}", entry.log_file, e)
            })?;

            let title = entry
                .log_file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.log_file.display().to_string());
            let processor = Processor::new(entry.kind, title, notifier.clone());

            info!(
                log_file = ?entry.log_file,
                registry = ?entry.registry,
                kind = ?entry.kind,
                files = monitor.registry().len(),
                "Monitor registry loaded"
            );
            monitors.push((monitor, processor));
        }

        let monitors_cancel = CancellationToken::new();
        let mut task_set = TaskSet::new();
        for (monitor, processor) in monitors {
            let cancel = monitors_cancel.clone();
            task_set.spawn(async move {
                monitor
                    .run(processor, cancel)
                    .await
                    .map_err(|e| -> BoxError { e.into() })
            });
        }

        let result = select! {
            _ = agent_cancel.cancelled() => {
                info!("Shutting down monitors.");
                Ok(())
            }
            e = wait::wait_for_any_task(&mut task_set) => {
                match e {
                    Ok(()) => {
                        warn!("Monitor exited unexpectedly, shutting down.");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "Monitor failed, shutting down.");
                        Err(e)
                    }
                }
            }
        };

        monitors_cancel.cancel();
        let shutdown = wait::wait_for_tasks_with_timeout(&mut task_set, self.shutdown_timeout).await;
        if let Err(e) = &shutdown {
            warn!(error = %e, "Monitors did not stop cleanly.");
        }

        result.and(shutdown)
    }
}
