//! Bounded outbound queue.
//!
//! Producers are any callers of `Connection::send`; the single consumer is
//! the connection's outbound loop. Enqueueing never blocks indefinitely:
//! callers pick between [`OutboundQueue::try_enqueue`] and
//! [`OutboundQueue::enqueue_timeout`], and a full queue is reported back
//! with the frame so the caller can decide to drop it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// An encoded envelope waiting to be written.
///
/// Shared so that a broadcast encodes once for all recipients.
pub type QueuedFrame = Arc<str>;

/// Why a frame was not enqueued. The frame is handed back.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// No space right now.
    #[error("Outbound queue is full")]
    Full(QueuedFrame),

    /// Still no space after the grace window.
    #[error("Timed out waiting for outbound queue space")]
    Timeout(QueuedFrame),

    /// The queue has been closed.
    #[error("Outbound queue is closed")]
    Closed(QueuedFrame),
}

/// Create a bounded queue.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn bounded(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        OutboundQueue {
            tx: Mutex::new(Some(tx)),
        },
        OutboundReceiver { rx },
    )
}

/// Producer side of the queue.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: Mutex<Option<mpsc::Sender<QueuedFrame>>>,
}

impl OutboundQueue {
    fn sender(&self) -> Option<mpsc::Sender<QueuedFrame>> {
        self.tx.lock().clone()
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] or [`EnqueueError::Closed`].
    pub fn try_enqueue(&self, frame: QueuedFrame) -> Result<(), EnqueueError> {
        let Some(tx) = self.sender() else {
            return Err(EnqueueError::Closed(frame));
        };

        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => EnqueueError::Full(frame),
            TrySendError::Closed(frame) => EnqueueError::Closed(frame),
        })
    }

    /// Enqueue, waiting up to `grace` for space.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Timeout`] or [`EnqueueError::Closed`].
    pub async fn enqueue_timeout(
        &self,
        frame: QueuedFrame,
        grace: Duration,
    ) -> Result<(), EnqueueError> {
        let Some(tx) = self.sender() else {
            return Err(EnqueueError::Closed(frame));
        };

        tx.send_timeout(frame, grace).await.map_err(|e| match e {
            SendTimeoutError::Timeout(frame) => EnqueueError::Timeout(frame),
            SendTimeoutError::Closed(frame) => EnqueueError::Closed(frame),
        })
    }

    /// Close the queue. Later enqueues fail with [`EnqueueError::Closed`].
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Number of frames waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Whether no frames are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side of the queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<QueuedFrame>,
}

impl OutboundReceiver {
    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<QueuedFrame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &str) -> QueuedFrame {
        Arc::from(s)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = bounded(4);
        queue.try_enqueue(frame("a")).unwrap();
        queue.try_enqueue(frame("b")).unwrap();
        queue.try_enqueue(frame("c")).unwrap();
        assert_eq!(queue.len(), 3);

        assert_eq!(&*rx.recv().await.unwrap(), "a");
        assert_eq!(&*rx.recv().await.unwrap(), "b");
        assert_eq!(&*rx.recv().await.unwrap(), "c");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_hands_frame_back() {
        let (queue, _rx) = bounded(1);
        queue.try_enqueue(frame("first")).unwrap();

        match queue.try_enqueue(frame("second")) {
            Err(EnqueueError::Full(f)) => assert_eq!(&*f, "second"),
            other => panic!("Expected Full, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_enqueue_gives_up() {
        let (queue, _rx) = bounded(1);
        queue.try_enqueue(frame("first")).unwrap();

        let started = tokio::time::Instant::now();
        let result = queue
            .enqueue_timeout(frame("second"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(EnqueueError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_enqueue_succeeds_when_space_frees() {
        let (queue, mut rx) = bounded(1);
        queue.try_enqueue(frame("first")).unwrap();

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            (first, second)
        });

        queue
            .enqueue_timeout(frame("second"), Duration::from_secs(5))
            .await
            .unwrap();

        let (first, second) = consumer.await.unwrap();
        assert_eq!(&*first, "first");
        assert_eq!(&*second, "second");
    }

    #[test]
    fn test_closed_queue_rejects() {
        let (queue, _rx) = bounded(8);
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.try_enqueue(frame("x")),
            Err(EnqueueError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_receiver_ends_after_close() {
        let (queue, mut rx) = bounded(8);
        queue.try_enqueue(frame("last")).unwrap();
        queue.close();

        assert_eq!(&*rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }
}
