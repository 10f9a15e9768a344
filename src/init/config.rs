// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading.
//!
//! The JSON file named on the command line is merged with `LOGWATCH_`
//! prefixed environment variables, using `__` to separate nested keys
//! (`LOGWATCH_WEBHOOK__FEISHU__SECRET`). Environment keys are lowercased, so
//! only all-lowercase keys such as the webhook settings can be overridden.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::processor::ProcessorKind;
use crate::sink::FeiShuConfig;
use crate::tailer::watcher::WatchMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: Vec<MonitorEntry>,

    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Wait between end-of-stream retries on an active file
    #[serde(
        rename = "pollInterval",
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    /// Interval between registry saves
    #[serde(
        rename = "checkpointInterval",
        default = "default_checkpoint_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub checkpoint_interval: Duration,

    #[serde(rename = "watchMode", default)]
    pub watch_mode: WatchMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorEntry {
    #[serde(rename = "type")]
    pub kind: ProcessorKind,

    #[serde(rename = "logFile")]
    pub log_file: PathBuf,

    pub registry: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub feishu: FeiShuConfig,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

impl Config {
    /// Load the configuration from `path`, applying environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Json::file_exact(path.as_ref()))
            .merge(
                Env::prefixed("LOGWATCH_")
                    .ignore(&["config", "log_format", "shutdown_timeout"])
                    .split("__"),
            );

        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.is_empty() {
            return Err(ConfigError::Invalid("no monitor configured".to_string()));
        }

        for (i, monitor) in self.monitor.iter().enumerate() {
            if monitor.log_file.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("monitor[{}]: logFile is empty", i)));
            }
            if monitor.log_file.file_name().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "monitor[{}]: logFile {:?} does not name a file",
                    i, monitor.log_file
                )));
            }
            if monitor.registry.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("monitor[{}]: registry is empty", i)));
            }
        }

        if self.webhook.feishu.url.is_empty() {
            return Err(ConfigError::Invalid("webhook.feishu.url is empty".to_string()));
        }

        if self.poll_interval.is_zero() || self.checkpoint_interval.is_zero() {
            return Err(ConfigError::Invalid("intervals must be greater than zero".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "monitor": [
            {"type": "zerolog", "logFile": "/var/log/app/app.log", "registry": "/var/lib/logwatch/app.json"},
            {"type": "mariadb", "logFile": "/var/log/mysql/general.log", "registry": "/var/lib/logwatch/mysql.json"}
        ],
        "webhook": {"feishu": {"url": "https://open.feishu.cn/open-apis/bot/v2/hook/abc", "secret": "s3cret"}},
        "pollInterval": "250ms",
        "checkpointInterval": "2m",
        "watchMode": "poll"
    }"#;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        Config::from_figment(Figment::new().merge(Json::string(json)))
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(SAMPLE).unwrap();

        assert_eq!(config.monitor.len(), 2);
        assert_eq!(config.monitor[0].kind, ProcessorKind::ZeroLog);
        assert_eq!(config.monitor[0].log_file, PathBuf::from("/var/log/app/app.log"));
        assert_eq!(config.monitor[1].kind, ProcessorKind::MariaDb);
        assert_eq!(config.webhook.feishu.secret, "s3cret");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(120));
        assert_eq!(config.watch_mode, WatchMode::Poll);
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"{"monitor": [{"type": "zerolog", "logFile": "app.log", "registry": "r.json"}],
                "webhook": {"feishu": {"url": "http://localhost/hook"}}}"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(5));
        assert_eq!(config.watch_mode, WatchMode::Auto);
        assert!(config.webhook.feishu.secret.is_empty());
    }

    #[test]
    fn test_unknown_monitor_type_fails() {
        let result = parse(
            r#"{"monitor": [{"type": "nginx", "logFile": "app.log", "registry": "r.json"}],
                "webhook": {"feishu": {"url": "http://localhost/hook"}}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_invalid_duration_fails() {
        let result = parse(
            r#"{"monitor": [{"type": "zerolog", "logFile": "app.log", "registry": "r.json"}],
                "webhook": {"feishu": {"url": "http://localhost/hook"}},
                "pollInterval": "soon"}"#,
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validation() {
        let no_monitor = parse(r#"{"webhook": {"feishu": {"url": "http://localhost/hook"}}}"#);
        assert!(matches!(no_monitor, Err(ConfigError::Invalid(_))));

        let no_url = parse(r#"{"monitor": [{"type": "zerolog", "logFile": "app.log", "registry": "r.json"}]}"#);
        assert!(matches!(no_url, Err(ConfigError::Invalid(_))));

        let empty_registry = parse(
            r#"{"monitor": [{"type": "zerolog", "logFile": "app.log", "registry": ""}],
                "webhook": {"feishu": {"url": "http://localhost/hook"}}}"#,
        );
        assert!(matches!(empty_registry, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path().join("env.json")),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("env.json", SAMPLE)?;
            jail.set_env("LOGWATCH_WEBHOOK__FEISHU__SECRET", "from-env");

            let config = Config::load("env.json").map_err(|e| e.to_string())?;
            assert_eq!(config.poll_interval, Duration::from_millis(250));
            assert_eq!(config.webhook.feishu.secret, "from-env");
            assert_eq!(config.webhook.feishu.url, "https://open.feishu.cn/open-apis/bot/v2/hook/abc");
            Ok(())
        });
    }
}
