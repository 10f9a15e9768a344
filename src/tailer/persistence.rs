// SPDX-License-Identifier: Apache-2.0

//! Registry snapshot storage.
//!
//! A snapshot is a JSON object keyed by inode number, each value a
//! [`FileRecord`]. Writes go to a temp file beside the snapshot which is then
//! renamed over it, so the canonical file always holds a complete snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::tailer::error::{Error, Result};
use crate::tailer::file_id::FileId;
use crate::tailer::record::FileRecord;

/// On-disk form of a snapshot.
type Snapshot = BTreeMap<u64, FileRecord>;

/// Load the snapshot at `path`.
///
/// A missing file yields an empty map. Records are keyed by the identity
/// rebuilt from their own `device` and `inode` fields.
pub fn load_snapshot(path: &Path) -> Result<HashMap<FileId, FileRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(Error::Persistence(format!(
                "failed to open registry {:?}: {}",
                path, e
            )));
        }
    };

    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        Error::Persistence(format!("failed to parse registry {:?}: {}", path, e))
    })?;

    let mut records = HashMap::with_capacity(snapshot.len());
    for (key, record) in snapshot {
        if key != record.inode {
            warn!(
                registry = ?path,
                key,
                inode = record.inode,
                "Registry key does not match record inode, using record"
            );
        }
        records.insert(record.file_id(), record);
    }
    Ok(records)
}

/// Serialize `records` and atomically replace the snapshot at `path`.
pub fn store_snapshot<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a FileRecord>,
) -> Result<()> {
    let mut snapshot = Snapshot::new();
    for record in records {
        if let Some(previous) = snapshot.insert(record.inode, record.clone()) {
            warn!(
                registry = ?path,
                inode = record.inode,
                kept = ?record.path,
                dropped = ?previous.path,
                "Records on different devices share an inode, only one is persisted"
            );
        }
    }
    atomic_write(path, &snapshot)
}

fn temp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    // Unique per process and per write so concurrent saves never share a file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id))
}

fn atomic_write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create registry directory: {}", e))
            })?;
        }
    }

    let temp_path = temp_path(path);
    let result = write_then_rename(&temp_path, path, snapshot);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_then_rename(temp_path: &Path, path: &Path, snapshot: &Snapshot) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)
        .map_err(|e| Error::Persistence(format!("failed to write registry: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e)))?;

    let file = writer
        .into_inner()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e)))?;
    file.sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync registry: {}", e)))?;
    drop(file);

    fs::rename(temp_path, path)
        .map_err(|e| Error::Persistence(format!("failed to rename registry file: {}", e)))
}
