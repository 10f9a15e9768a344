// SPDX-License-Identifier: Apache-2.0

//! Incremental, delimiter-driven reader over one tracked file.
//!
//! Reading is split in two steps so that format processors can group several
//! delimited spans into one logical unit without miscounting bytes:
//! - [`TailingReader::peek`] reads up to the next delimiter and stages the span
//!   as pending, without committing it.
//! - [`TailingReader::consume`] commits everything pending as a single unit and
//!   advances the offset by exactly its length.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeekExt, BufReader};
use tracing::trace;

use crate::tailer::error::TailError;
use crate::tailer::file_id::FileId;
use crate::tailer::record::FileRecord;

type Source = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// One tailing session over an open file.
pub struct TailingReader {
    path: PathBuf,
    source: Source,
    /// Bytes committed by `consume` so far, starting at the record's offset
    offset: u64,
    /// Bytes read since the last delimiter match; survives end-of-stream so a
    /// partially written unit is completed on the next attempt
    scan: Vec<u8>,
    /// Matched spans not yet committed
    pending: Vec<u8>,
}

impl TailingReader {
    /// Open the record's file and position it at the record's offset.
    ///
    /// Fails if the path now refers to a different file than the record's
    /// identity, which happens when the file was rotated away and replaced.
    pub async fn open(record: &FileRecord) -> Result<Self, TailError> {
        let read_error = |source| TailError::Read {
            path: record.path.clone(),
            source,
        };

        let mut file = tokio::fs::File::open(&record.path)
            .await
            .map_err(read_error)?;

        let metadata = file.metadata().await.map_err(read_error)?;
        let actual = FileId::from_metadata(&metadata);
        if actual != record.file_id() {
            return Err(read_error(std::io::Error::other(format!(
                "file identity changed from {} to {}",
                record.file_id(),
                actual
            ))));
        }

        file.seek(SeekFrom::Start(record.offset))
            .await
            .map_err(read_error)?;

        Ok(Self::from_reader(&record.path, file, record.offset))
    }

    /// Wrap an already positioned reader whose first byte sits at `offset`.
    pub fn from_reader(
        path: impl AsRef<Path>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        offset: u64,
    ) -> Self {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            path: path.as_ref().to_path_buf(),
            source: BufReader::new(boxed),
            offset,
            scan: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last committed unit.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes staged by `peek` and not yet committed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read until the bytes since the last match end with `delimiter`, stage
    /// them as pending and return them.
    ///
    /// An empty delimiter returns immediately without reading. Returns
    /// [`TailError::EndOfStream`] when the file has no more data yet; bytes read
    /// so far are kept and completed by the next call.
    pub async fn peek(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, TailError> {
        if delimiter.is_empty() {
            return Ok(Vec::new());
        }

        loop {
            let available = self.source.fill_buf().await.map_err(|source| TailError::Read {
                path: self.path.clone(),
                source,
            })?;
            if available.is_empty() {
                return Err(TailError::EndOfStream);
            }

            let mut used = 0;
            let mut matched = false;
            for byte in available {
                used += 1;
                self.scan.push(*byte);
                if self.scan.ends_with(delimiter) {
                    matched = true;
                    break;
                }
            }
            self.source.consume(used);

            if matched {
                let span = std::mem::take(&mut self.scan);
                self.pending.extend_from_slice(&span);
                trace!(path = ?self.path, len = span.len(), pending = self.pending.len(), "Peeked span");
                return Ok(span);
            }
        }
    }

    /// Peek one more span (none for an empty delimiter), then commit every
    /// pending span as one unit and advance the offset by its length.
    pub async fn consume(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, TailError> {
        self.peek(delimiter).await?;

        let unit = std::mem::take(&mut self.pending);
        self.offset += unit.len() as u64;
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn reader_over(content: &str) -> TailingReader {
        TailingReader::from_reader("test.log", Cursor::new(content.as_bytes().to_vec()), 0)
    }

    #[tokio::test]
    async fn test_consume_returns_one_line_at_a_time() {
        let mut reader = reader_over("first\nsecond\n");

        assert_eq!(reader.consume(b"\n").await.unwrap(), b"first\n");
        assert_eq!(reader.offset(), 6);
        assert_eq!(reader.consume(b"\n").await.unwrap(), b"second\n");
        assert_eq!(reader.offset(), 13);
        assert!(reader.consume(b"\n").await.unwrap_err().is_end_of_stream());
        assert_eq!(reader.offset(), 13);
    }

    #[tokio::test]
    async fn test_offset_increments_by_unit_length() {
        let mut reader = reader_over("a\nbb\nccc\n");
        let mut last = reader.offset();

        while let Ok(unit) = reader.consume(b"\n").await {
            assert_eq!(reader.offset() - last, unit.len() as u64);
            last = reader.offset();
        }
        assert_eq!(last, 9);
    }

    #[tokio::test]
    async fn test_peeks_accumulate_until_consume() {
        let mut reader = reader_over("SET a;SELECT 1;");

        assert_eq!(reader.peek(b";").await.unwrap(), b"SET a;");
        assert_eq!(reader.peek(b";").await.unwrap(), b"SELECT 1;");
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.pending_len(), 15);

        let unit = reader.consume(b"").await.unwrap();
        assert_eq!(unit, b"SET a;SELECT 1;");
        assert_eq!(reader.offset(), 15);
        assert_eq!(reader.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_delimiter_peek_reads_nothing() {
        let mut reader = reader_over("data\n");

        assert!(reader.peek(b"").await.unwrap().is_empty());
        assert_eq!(reader.consume(b"").await.unwrap(), b"");
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.consume(b"\n").await.unwrap(), b"data\n");
    }

    #[tokio::test]
    async fn test_multi_byte_delimiter() {
        let mut reader = reader_over("one\r\ntwo\r\n");

        assert_eq!(reader.consume(b"\r\n").await.unwrap(), b"one\r\n");
        assert_eq!(reader.consume(b"\r\n").await.unwrap(), b"two\r\n");
    }

    #[tokio::test]
    async fn test_partial_line_completes_after_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "done\npart").unwrap();

        let record = FileRecord::stat(&path).unwrap();
        let mut reader = TailingReader::open(&record).await.unwrap();

        assert_eq!(reader.consume(b"\n").await.unwrap(), b"done\n");
        assert!(reader.consume(b"\n").await.unwrap_err().is_end_of_stream());
        assert_eq!(reader.offset(), 5);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"ial\n").unwrap();
        file.flush().unwrap();

        assert_eq!(reader.consume(b"\n").await.unwrap(), b"partial\n");
        assert_eq!(reader.offset(), 13);
    }

    #[tokio::test]
    async fn test_open_seeks_to_saved_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "skip\nkeep\n").unwrap();

        let mut record = FileRecord::stat(&path).unwrap();
        record.offset = 5;
        let mut reader = TailingReader::open(&record).await.unwrap();

        assert_eq!(reader.consume(b"\n").await.unwrap(), b"keep\n");
        assert_eq!(reader.offset(), 10);
    }

    #[tokio::test]
    async fn test_open_rejects_replaced_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();
        let record = FileRecord::stat(&path).unwrap();

        // Keep the old inode alive so the replacement cannot reuse it
        let _old = std::fs::File::open(&path).unwrap();
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "new\n").unwrap();

        match TailingReader::open(&record).await {
            Err(TailError::Read { .. }) => {}
            other => panic!("expected read error, got {:?}", other.map(|r| r.offset())),
        }
    }
}
