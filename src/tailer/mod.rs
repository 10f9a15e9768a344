// SPDX-License-Identifier: Apache-2.0

//! File tracking and tailing engine.
//!
//! Files are tracked by device and inode so a log file keeps its read
//! position across renames and process restarts. The [`Registry`] owns the
//! tracked files and their persisted offsets, the directory watcher feeds it
//! newly created files, and a [`Monitor`] tails them one at a time through a
//! [`TailingReader`].

pub mod checkpoint;
pub mod error;
pub mod file_id;
pub mod pattern;
pub mod persistence;
pub mod reader;
pub mod record;
pub mod registry;
pub mod tail;
pub mod watcher;

pub use error::{Error, Result, TailError};
pub use file_id::FileId;
pub use reader::TailingReader;
pub use record::FileRecord;
pub use registry::Registry;
pub use tail::{Monitor, MonitorConfig, SessionEnd};
