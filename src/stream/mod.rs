//! Bounded stream primitives coupling a blocking thread to a task.
//!
//! # Responsibilities
//! - Hand items across the thread/event-loop boundary in FIFO order
//! - Enforce backpressure with a fixed number of queue slots
//! - Carry close and error signals to the consuming side
//!
//! # Design Decisions
//! - Two distinct primitives, one per direction. Their wait/wake mechanics
//!   are asymmetric (a thread parks on a condition variable, a task parks on
//!   its waker), and keeping them separate keeps each implementation small.
//! - An attached error is delivered to the consumer exactly once; reads
//!   after that observe end-of-stream.

mod async_to_sync;
mod sync_to_async;

pub use async_to_sync::{async_to_sync, AsyncProducer, SyncConsumer};
pub use sync_to_async::{sync_to_async, AsyncConsumer, SyncProducer, TryNext};
