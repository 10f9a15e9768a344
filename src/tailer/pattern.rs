// SPDX-License-Identifier: Apache-2.0

//! Matching of directory entries against a configured log file name.

use regex::Regex;

use crate::tailer::error::{Error, Result};

/// Conventional suffix of log files.
pub const LOG_SUFFIX: &str = ".log";

/// Matches the active log file and its rotated siblings.
///
/// For a configured name `app.log` the stem is `app`, and any entry named
/// `app*.log` or `app*.log.<n>` matches (`app.log`, `app.log.1`,
/// `app-2024-01-01.log`). Matching is case-sensitive.
#[derive(Debug, Clone)]
pub struct LogPattern {
    name: String,
    regex: Regex,
}

impl LogPattern {
    pub fn new(log_file_name: &str) -> Result<Self> {
        if log_file_name.is_empty() {
            return Err(Error::Config("log file name cannot be empty".to_string()));
        }

        let stem = log_file_name
            .strip_suffix(LOG_SUFFIX)
            .unwrap_or(log_file_name);
        let pattern = format!(
            r"^{}.*{}(\.\d+)?$",
            regex::escape(stem),
            regex::escape(LOG_SUFFIX)
        );
        let regex = Regex::new(&pattern).map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            name: log_file_name.to_string(),
            regex,
        })
    }

    /// The configured (active) log file name.
    pub fn active_name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name == self.name || self.regex.is_match(file_name)
    }
}
