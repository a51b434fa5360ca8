//! Bounded stream from a blocking producer thread to a task consumer.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::BridgeError;

/// Create a bounded thread-to-task stream with `capacity` slots.
///
/// The producer blocks its thread when the queue is full; the consumer
/// suspends its task when the queue is empty. The cross-thread wakeup rides
/// on the channel's waker, so the producer never touches the event loop
/// directly.
pub fn sync_to_async<T: Send>(capacity: usize) -> (SyncProducer<T>, AsyncConsumer<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let slot = Arc::new(ErrorSlot::default());
    (
        SyncProducer {
            tx: Some(tx),
            slot: slot.clone(),
        },
        AsyncConsumer { rx, slot },
    )
}

/// Shared slot carrying an error from the closing side to the consumer.
#[derive(Default)]
struct ErrorSlot {
    error: Mutex<Option<BridgeError>>,
}

impl ErrorSlot {
    fn set(&self, error: BridgeError) {
        let mut guard = self.error.lock().expect("error slot mutex poisoned");
        // First error wins; a later close never replaces it.
        guard.get_or_insert(error);
    }

    fn take(&self) -> Option<BridgeError> {
        self.error.lock().expect("error slot mutex poisoned").take()
    }
}

/// Producing half, held by a blocking thread.
pub struct SyncProducer<T> {
    tx: Option<mpsc::Sender<T>>,
    slot: Arc<ErrorSlot>,
}

impl<T: Send> SyncProducer<T> {
    /// Enqueue an item, blocking the calling thread until a slot frees up.
    ///
    /// Fails with [`BridgeError::Closed`] once the consumer has gone away or
    /// closed its end.
    pub fn put(&mut self, item: T) -> Result<(), BridgeError> {
        match &self.tx {
            Some(tx) => tx.blocking_send(item).map_err(|_| BridgeError::Closed),
            None => Err(BridgeError::Closed),
        }
    }

    /// Signal end-of-stream. Idempotent.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Signal end-of-stream with an attached error. The consumer's next
    /// read after draining buffered items yields the error once.
    pub fn close_with(&mut self, error: BridgeError) {
        if self.tx.is_some() {
            self.slot.set(error);
            self.tx = None;
        }
    }
}

/// Outcome of a non-blocking read attempt.
pub enum TryNext<T> {
    /// An item was waiting in the queue.
    Item(T),
    /// The queue is currently empty but the stream is still open.
    Empty,
    /// The stream ended cleanly.
    Eof,
    /// The stream ended with an attached error.
    Failed(BridgeError),
}

/// Consuming half, held by a task.
pub struct AsyncConsumer<T> {
    rx: mpsc::Receiver<T>,
    slot: Arc<ErrorSlot>,
}

impl<T: Send> AsyncConsumer<T> {
    /// Await the next item. `Ok(None)` marks end-of-stream; an error
    /// attached by the producer is surfaced exactly once, after which reads
    /// observe end-of-stream.
    pub async fn next(&mut self) -> Result<Option<T>, BridgeError> {
        match self.rx.recv().await {
            Some(item) => Ok(Some(item)),
            None => match self.slot.take() {
                Some(error) => Err(error),
                None => Ok(None),
            },
        }
    }

    /// Non-blocking read attempt.
    pub fn try_next(&mut self) -> TryNext<T> {
        match self.rx.try_recv() {
            Ok(item) => TryNext::Item(item),
            Err(TryRecvError::Empty) => TryNext::Empty,
            Err(TryRecvError::Disconnected) => match self.slot.take() {
                Some(error) => TryNext::Failed(error),
                None => TryNext::Eof,
            },
        }
    }

    /// Close the consuming end. Buffered items stay readable; subsequent
    /// `put` calls on the producer fail.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
