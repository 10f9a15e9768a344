// SPDX-License-Identifier: Apache-2.0

//! Bounded hand-off channel used as the discovery queue between the registry
//! (and its directory watcher) and the tailing loop of a monitor.

use flume::{Receiver, SendTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// No receiver is left to take the item.
    Disconnected,
    /// The channel stayed full for the whole timeout; the item is handed back.
    Timeout(T),
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
            SendError::Timeout(_) => write!(f, "timed out waiting for channel capacity"),
        }
    }
}

impl<T> BoundedSender<T> {
    #[cfg(test)]
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    /// Blocking send bounded by `timeout`.
    /// Use this from non-async contexts (e.g., dedicated OS threads) that must
    /// periodically check for cancellation while the receiver is busy.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) => Err(SendError::Timeout(item)),
            Err(SendTimeoutError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv_async().await {
            Ok(item) => Some(item),
            Err(_e) => None, // disconnected
        }
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    #[cfg(test)]
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    let sender = BoundedSender { tx };
    let receiver = BoundedReceiver { rx };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn basics() {
        let (tx, mut rx) = bounded(3);

        let msg = 10;

        let mut send1 = spawn(async { tx.send(msg).await });
        let mut recv1 = spawn(async { rx.next().await });

        assert!(!send1.is_woken());
        assert!(!recv1.is_woken());

        // receiver should be in pending state
        assert_pending!(recv1.poll());

        assert_ok!(assert_ready!(send1.poll()));

        assert!(recv1.is_woken());

        assert_eq!(Some(msg), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        let mut recv2 = spawn(async { rx.next().await });

        drop(tx);
        // receives None since send channel was closed
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn capacity_one_holds_a_single_item() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        let mut send2 = spawn(async { tx.send(2).await });

        // Now blocks until the first item is taken
        assert_pending!(send2.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        drop(recv1);

        assert_ok!(assert_ready!(send2.poll()));
    }

    #[test]
    fn send_timeout_returns_item_when_full() {
        let (tx, rx) = bounded(1);

        tx.send_timeout(1, Duration::from_millis(10)).unwrap();
        match tx.send_timeout(2, Duration::from_millis(10)) {
            Err(SendError::Timeout(item)) => assert_eq!(item, 2),
            other => panic!("expected timeout, got {:?}", other),
        }

        assert_eq!(rx.try_recv(), Some(1));
        assert!(rx.is_empty());
    }

    #[test]
    fn send_timeout_fails_on_rx_close() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert_eq!(
            tx.send_timeout(1, Duration::from_millis(10)),
            Err(SendError::Disconnected)
        );
    }
}
