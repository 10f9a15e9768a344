// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while constructing or maintaining a monitor's registry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of reading from a tracked file that did not yield a logical unit.
#[derive(Error, Debug)]
pub enum TailError {
    /// Not enough data yet. Not a failure: the active file waits and retries,
    /// a historical file is finished.
    #[error("end of stream")]
    EndOfStream,

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TailError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TailError::EndOfStream)
    }
}
