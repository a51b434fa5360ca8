//! Bounded stream from a task producer to a blocking consumer thread.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::BridgeError;

/// Create a bounded task-to-thread stream with `capacity` slots.
///
/// Producers suspend their task when the queue is full; the consumer parks
/// its thread on a condition variable when the queue is empty. Producers are
/// cloneable so a request's sender and control signals can share one stream.
pub fn async_to_sync<T: Send>(capacity: usize) -> (AsyncProducer<T>, SyncConsumer<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            closed: false,
            consumer_gone: false,
            error: None,
            producer_wakers: Vec::new(),
            producers: 1,
        }),
        available: Condvar::new(),
    });
    (
        AsyncProducer {
            inner: inner.clone(),
        },
        SyncConsumer { inner },
    )
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Signals the consumer thread that an item arrived or the stream closed.
    available: Condvar,
}

struct State<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
    consumer_gone: bool,
    error: Option<BridgeError>,
    producer_wakers: Vec<Waker>,
    producers: usize,
}

impl<T> State<T> {
    fn take_producer_wakers(&mut self) -> Vec<Waker> {
        std::mem::take(&mut self.producer_wakers)
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().expect("stream state mutex poisoned")
    }

    fn close(&self, error: Option<BridgeError>) {
        let wakers = {
            let mut state = self.lock();
            if !state.closed {
                state.closed = true;
                state.error = error;
            }
            state.take_producer_wakers()
        };
        self.available.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Producing half, held by tasks. Cloneable.
pub struct AsyncProducer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send> AsyncProducer<T> {
    /// Enqueue an item, suspending the calling task until a slot frees up.
    ///
    /// Fails with [`BridgeError::Closed`] once the stream is closed or the
    /// consumer has gone away.
    pub async fn put(&self, item: T) -> Result<(), BridgeError> {
        let mut item = Some(item);
        poll_fn(|cx| {
            let mut state = self.inner.lock();
            if state.closed || state.consumer_gone {
                return Poll::Ready(Err(BridgeError::Closed));
            }
            if state.queue.len() < state.capacity {
                match item.take() {
                    Some(value) => state.queue.push_back(value),
                    None => return Poll::Ready(Ok(())),
                }
                drop(state);
                self.inner.available.notify_one();
                Poll::Ready(Ok(()))
            } else {
                let waker = cx.waker();
                if !state.producer_wakers.iter().any(|w| w.will_wake(waker)) {
                    state.producer_wakers.push(waker.clone());
                }
                Poll::Pending
            }
        })
        .await
    }

    /// Signal end-of-stream. Idempotent; affects every cloned producer.
    pub fn close(&self) {
        self.inner.close(None);
    }

    /// Signal end-of-stream with an attached error. The consumer's next
    /// read after draining buffered items yields the error once.
    pub fn close_with(&self, error: BridgeError) {
        self.inner.close(Some(error));
    }
}

impl<T> Clone for AsyncProducer<T> {
    fn clone(&self) -> Self {
        self.inner.lock().producers += 1;
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for AsyncProducer<T> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.inner.lock();
            state.producers -= 1;
            state.producers == 0
        };
        if last {
            // All producers gone: readers must not park forever.
            self.inner.close(None);
        }
    }
}

/// Consuming half, held by a blocking thread.
pub struct SyncConsumer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send> SyncConsumer<T> {
    /// Block until the next item arrives. `Ok(None)` marks end-of-stream;
    /// an error attached by the producer side is surfaced exactly once.
    ///
    /// With a timeout, expiry yields [`BridgeError::Timeout`] without
    /// disturbing the stream.
    pub fn next(&mut self, timeout: Option<Duration>) -> Result<Option<T>, BridgeError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                let wakers = state.take_producer_wakers();
                drop(state);
                for waker in wakers {
                    waker.wake();
                }
                return Ok(Some(item));
            }
            if state.closed {
                return match state.error.take() {
                    Some(error) => Err(error),
                    None => Ok(None),
                };
            }
            state = match deadline {
                None => self
                    .inner
                    .available
                    .wait(state)
                    .expect("stream state mutex poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BridgeError::Timeout);
                    }
                    let (guard, _) = self
                        .inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .expect("stream state mutex poisoned");
                    guard
                }
            };
        }
    }
}

impl<T> Drop for SyncConsumer<T> {
    fn drop(&mut self) {
        let wakers = {
            let mut state = self.inner.lock();
            state.consumer_gone = true;
            state.take_producer_wakers()
        };
        for waker in wakers {
            waker.wake();
        }
    }
}
