// SPDX-License-Identifier: Apache-2.0

//! Per-format line processors.
//!
//! A processor performs one bounded unit of work per call: read one logical
//! unit through the [`TailingReader`], decide whether it is notable, and
//! forward it to the notifier if so. End of stream and read failures are
//! returned to the tailing loop, which decides what they mean for the file.

mod mariadb;
mod zerolog;

pub use mariadb::MariaDb;
pub use zerolog::ZeroLog;

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::sink::Notifier;
use crate::tailer::error::TailError;
use crate::tailer::reader::TailingReader;

/// Outcome of one successful processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Spans were staged but nothing was committed yet
    Pending,
    /// A unit was committed and was not notable
    Quiet,
    /// A unit was committed and delivered to the notifier
    Delivered,
    /// A unit was committed but the notifier failed; tailing goes on
    DeliveryFailed,
}

pub trait LineProcessor: Send {
    fn process(
        &mut self,
        reader: &mut TailingReader,
    ) -> impl Future<Output = Result<Step, TailError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    /// zerolog-style JSON lines, one object per line
    ZeroLog,
    /// MariaDB/MySQL general and slow query logs
    MariaDb,
}

impl std::str::FromStr for ProcessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zerolog" => Ok(ProcessorKind::ZeroLog),
            "mariadb" => Ok(ProcessorKind::MariaDb),
            _ => Err(format!(
                "Invalid processor type '{}'. Valid options: zerolog, mariadb",
                s
            )),
        }
    }
}

/// The processor configured for a monitor.
pub enum Processor {
    ZeroLog(ZeroLog),
    MariaDb(MariaDb),
}

impl Processor {
    /// Build a processor whose notifications are titled `title`.
    pub fn new(kind: ProcessorKind, title: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        match kind {
            ProcessorKind::ZeroLog => Processor::ZeroLog(ZeroLog::new(title, notifier)),
            ProcessorKind::MariaDb => Processor::MariaDb(MariaDb::new(title, notifier)),
        }
    }
}

impl LineProcessor for Processor {
    async fn process(&mut self, reader: &mut TailingReader) -> Result<Step, TailError> {
        match self {
            Processor::ZeroLog(p) => p.process(reader).await,
            Processor::MariaDb(p) => p.process(reader).await,
        }
    }
}

async fn deliver(notifier: &dyn Notifier, title: &str, text: &str) -> Step {
    match notifier.send(title, text).await {
        Ok(()) => Step::Delivered,
        Err(e) => {
            warn!(title, error = %e, "Failed to deliver notification");
            Step::DeliveryFailed
        }
    }
}

#[cfg(test)]
pub(crate) mod test_notifiers {
    use std::sync::Mutex;

    use crate::sink::{Notifier, SendFuture, SinkError};

    /// Records every message it is asked to send.
    #[derive(Default)]
    pub struct Recording {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl Recording {
        pub fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for Recording {
        fn send<'a>(&'a self, title: &'a str, text: &'a str) -> SendFuture<'a> {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), text.to_string()));
            Box::pin(async { Ok(()) })
        }
    }

    /// Fails every delivery.
    pub struct Failing;

    impl Notifier for Failing {
        fn send<'a>(&'a self, _title: &'a str, _text: &'a str) -> SendFuture<'a> {
            Box::pin(async { Err(SinkError::Transport("connection refused".to_string())) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_notifiers::Recording;
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_processor_kind_from_str() {
        assert_eq!("zerolog".parse::<ProcessorKind>().unwrap(), ProcessorKind::ZeroLog);
        assert_eq!("mariadb".parse::<ProcessorKind>().unwrap(), ProcessorKind::MariaDb);
        assert!("syslog".parse::<ProcessorKind>().is_err());
    }

    #[test]
    fn test_processor_kind_deserialize() {
        let kind: ProcessorKind = serde_json::from_str("\"mariadb\"").unwrap();
        assert_eq!(kind, ProcessorKind::MariaDb);
        assert!(serde_json::from_str::<ProcessorKind>("\"nginx\"").is_err());
    }

    #[tokio::test]
    async fn test_processor_dispatches_by_kind() {
        let notifier = Arc::new(Recording::default());
        let mut processor = Processor::new(ProcessorKind::ZeroLog, "app.log", notifier.clone());
        let mut reader = TailingReader::from_reader(
            "app.log",
            Cursor::new(b"{\"level\":\"error\"}\n".to_vec()),
            0,
        );

        assert_eq!(processor.process(&mut reader).await.unwrap(), Step::Delivered);
        assert_eq!(notifier.messages().len(), 1);
    }
}
