// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Path of the JSON configuration file
    #[arg(long, short = 'c', env = "LOGWATCH_CONFIG", default_value = "env.json")]
    pub config: PathBuf,

    /// How long to wait for monitors to save their registries on shutdown
    #[arg(long, env = "LOGWATCH_SHUTDOWN_TIMEOUT", default_value = "10s")]
    pub shutdown_timeout: humantime::Duration,
}

impl Default for AgentRun {
    fn default() -> Self {
        AgentRun {
            config: PathBuf::from("env.json"),
            shutdown_timeout: std::time::Duration::from_secs(10).into(),
        }
    }
}
