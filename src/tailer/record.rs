// SPDX-License-Identifier: Apache-2.0

//! Cursor state for one tracked file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tailer::file_id::FileId;

/// A tracked file: where it lives, how far it has been consumed, and what it
/// looked like when it was last stat-ed.
///
/// This is also the persisted form, so field names follow the registry file
/// format: `{path, offset, size, inode, device, created, modified}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Last known path of the file
    pub path: PathBuf,
    /// Bytes already consumed
    pub offset: u64,
    /// Size observed at the last stat
    pub size: u64,
    pub inode: u64,
    pub device: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh record (offset 0) by stat-ing `path`.
    pub fn stat(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        let id = FileId::from_metadata(&metadata);

        let modified: DateTime<Utc> = metadata.modified()?.into();
        let created = metadata.created().map(DateTime::from).unwrap_or(modified);

        Ok(Self {
            path: path.to_path_buf(),
            offset: 0,
            size: metadata.len(),
            inode: id.ino(),
            device: id.dev(),
            created,
            modified,
        })
    }

    pub fn file_id(&self) -> FileId {
        FileId::new(self.device, self.inode)
    }

    /// Base name of the file, used as the notification title and to decide
    /// whether this is the active log file.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Take over the cosmetic fields of a newer observation of the same file,
    /// leaving the offset untouched.
    pub fn refresh_from(&mut self, newer: &FileRecord) {
        self.path = newer.path.clone();
        self.size = newer.size;
        self.created = newer.created;
        self.modified = newer.modified;
    }
}
