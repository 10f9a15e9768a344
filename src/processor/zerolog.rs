// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use super::{LineProcessor, Step, deliver};
use crate::sink::Notifier;
use crate::tailer::error::TailError;
use crate::tailer::reader::TailingReader;

/// Forwards JSON log lines whose `level` is `error`.
///
/// Lines that are not JSON objects are consumed and skipped.
pub struct ZeroLog {
    title: String,
    notifier: Arc<dyn Notifier>,
}

impl ZeroLog {
    pub fn new(title: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            title: title.into(),
            notifier,
        }
    }
}

impl LineProcessor for ZeroLog {
    async fn process(&mut self, reader: &mut TailingReader) -> Result<Step, TailError> {
        let unit = reader.consume(b"\n").await?;
        let line = String::from_utf8_lossy(&unit);
        if line.trim().is_empty() {
            return Ok(Step::Quiet);
        }

        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(entry)) => {
                if entry.get("level").and_then(Value::as_str) == Some("error") {
                    return Ok(deliver(self.notifier.as_ref(), &self.title, &line).await);
                }
                trace!(path = ?reader.path(), offset = reader.offset(), "Skipping non-error line");
                Ok(Step::Quiet)
            }
            Ok(_) => {
                warn!(
                    path = ?reader.path(),
                    offset = reader.offset(),
                    "Skipping JSON line that is not an object"
                );
                Ok(Step::Quiet)
            }
            Err(e) => {
                warn!(
                    path = ?reader.path(),
                    offset = reader.offset(),
                    error = %e,
                    "Skipping line that is not a JSON log entry"
                );
                Ok(Step::Quiet)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_notifiers::{Failing, Recording};
    use std::io::Cursor;

    fn reader_over(content: &str) -> TailingReader {
        TailingReader::from_reader("app.log", Cursor::new(content.as_bytes().to_vec()), 0)
    }

    #[tokio::test]
    async fn test_error_lines_are_delivered() {
        let notifier = Arc::new(Recording::default());
        let mut processor = ZeroLog::new("app.log", notifier.clone());
        let mut reader = reader_over(
            "{\"level\":\"info\",\"message\":\"started\"}\n{\"level\":\"error\",\"message\":\"boom\"}\n",
        );

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Quiet);
        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Delivered);
        assert!(processor.process(&mut reader).await.unwrap_err().is_end_of_stream());

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "app.log");
        assert_eq!(messages[0].1, "{\"level\":\"error\",\"message\":\"boom\"}\n");
    }

    #[tokio::test]
    async fn test_invalid_json_is_skipped() {
        let notifier = Arc::new(Recording::default());
        let mut processor = ZeroLog::new("app.log", notifier.clone());
        let mut reader = reader_over("panic: runtime error\n\n[\"error\"]\n{\"level\":\"error\"}\n");

        for _ in 0..3 {
            assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Quiet);
        }
        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Delivered);
        assert_eq!(reader.offset(), 50);
    }

    #[tokio::test]
    async fn test_missing_level_is_quiet() {
        let notifier = Arc::new(Recording::default());
        let mut processor = ZeroLog::new("app.log", notifier.clone());
        let mut reader = reader_over("{\"message\":\"no level\"}\n");

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Quiet);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_partial_line_is_not_consumed() {
        let notifier = Arc::new(Recording::default());
        let mut processor = ZeroLog::new("app.log", notifier);
        let mut reader = reader_over("{\"level\":\"error\"");

        assert!(processor.process(&mut reader).await.unwrap_err().is_end_of_stream());
        assert_eq!(reader.offset(), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_consumes() {
        let mut processor = ZeroLog::new("app.log", Arc::new(Failing));
        let mut reader = reader_over("{\"level\":\"error\"}\n{\"level\":\"error\"}\n");

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::DeliveryFailed);
        assert_eq!(reader.offset(), 18);
        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::DeliveryFailed);
        assert_eq!(reader.offset(), 36);
    }
}
