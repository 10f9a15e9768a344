// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::trace;

use super::{LineProcessor, Step, deliver};
use crate::sink::Notifier;
use crate::tailer::error::TailError;
use crate::tailer::reader::TailingReader;

/// Marker of the session-timestamp preamble the server writes before a
/// logged statement.
const TIMESTAMP_PREAMBLE: &str = "SET timestamp=";

/// Forwards every statement of a MariaDB/MySQL query log.
///
/// Statements are `;`-terminated. A `SET timestamp=...;` preamble is not sent
/// on its own: it stays pending and is delivered together with the statement
/// that follows it.
pub struct MariaDb {
    title: String,
    notifier: Arc<dyn Notifier>,
}

impl MariaDb {
    pub fn new(title: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            title: title.into(),
            notifier,
        }
    }
}

impl LineProcessor for MariaDb {
    async fn process(&mut self, reader: &mut TailingReader) -> Result<Step, TailError> {
        let span = reader.peek(b";").await?;
        if String::from_utf8_lossy(&span).contains(TIMESTAMP_PREAMBLE) {
            trace!(path = ?reader.path(), pending = reader.pending_len(), "Holding timestamp preamble");
            return Ok(Step::Pending);
        }

        let unit = reader.consume(b"").await?;
        let statement = String::from_utf8_lossy(&unit);
        Ok(deliver(self.notifier.as_ref(), &self.title, &statement).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_notifiers::{Failing, Recording};
    use std::io::Cursor;

    fn reader_over(content: &str) -> TailingReader {
        TailingReader::from_reader("mysql.log", Cursor::new(content.as_bytes().to_vec()), 0)
    }

    #[tokio::test]
    async fn test_statement_is_delivered() {
        let notifier = Arc::new(Recording::default());
        let mut processor = MariaDb::new("mysql.log", notifier.clone());
        let mut reader = reader_over("DROP TABLE users;");

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Delivered);
        assert_eq!(reader.offset(), 17);
        assert_eq!(
            notifier.messages(),
            vec![("mysql.log".to_string(), "DROP TABLE users;".to_string())]
        );
    }

    #[tokio::test]
    async fn test_timestamp_preamble_is_merged_into_next_statement() {
        let notifier = Arc::new(Recording::default());
        let mut processor = MariaDb::new("mysql.log", notifier.clone());
        let content = "# Time: 240101\nSET timestamp=1704067200;\nSELECT sleep(5);";
        let mut reader = reader_over(content);

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Pending);
        assert_eq!(reader.offset(), 0);
        assert!(notifier.messages().is_empty());

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Delivered);
        assert_eq!(reader.offset(), content.len() as u64);
        assert_eq!(notifier.messages()[0].1, content);
    }

    #[tokio::test]
    async fn test_incomplete_statement_waits() {
        let notifier = Arc::new(Recording::default());
        let mut processor = MariaDb::new("mysql.log", notifier.clone());
        let mut reader = reader_over("SELECT * FROM");

        assert!(processor.process(&mut reader).await.unwrap_err().is_end_of_stream());
        assert_eq!(reader.offset(), 0);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_still_commits() {
        let mut processor = MariaDb::new("mysql.log", Arc::new(Failing));
        let mut reader = reader_over("SELECT 1;SELECT 2;");

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::DeliveryFailed);
        assert_eq!(reader.offset(), 9);
    }
}
