//! Bidirectional adapter between two HTTP application contracts.
//!
//! One contract is blocking (WSGI-style): the application runs on a worker
//! thread, reads its request body from a blocking stream and returns an
//! iterator of response chunks. The other is event-driven (ASGI-style): the
//! application is a cooperatively scheduled task exchanging typed messages
//! over `receive`/`send` queues.
//!
//! # Architecture Overview
//!
//! ```text
//!                  WsgiToAsgi                         AsgiToWsgi
//!
//!   event messages                       blocking call
//!   ──────────────▶ request pump         ─────────────▶ scope builder
//!                       │ REQ (bounded)                     │ REQ (bounded)
//!                       ▼                                   ▼ fed on demand
//!                  wsgi.input ──▶ app on worker       receive() ──▶ app task
//!                                   │ thread                          │
//!                       RESP        ▼                     RESP        ▼
//!                  ◀── (bounded) iterator             ◀── (bounded) send()
//!   event messages                       chunk iterator
//!   ◀────────────── response pump        ◀───────────── response driver
//! ```
//!
//! Neither direction buffers more than its bounded queues hold: a slow
//! consumer suspends the producing task or blocks the producing thread,
//! and backpressure carries through to the peer.
//!
//! The blocking side of either adapter must run on a plain thread; the
//! event side runs on a tokio scheduler. Application code never crosses
//! that line: worker threads never touch the event loop, and tasks never
//! block.

// The two application contracts
pub mod asgi;
pub mod wsgi;

// Translation and transport between them
pub mod bridge;
pub mod stream;
pub mod translate;

// Cross-cutting concerns
pub mod config;
pub mod error;

pub use bridge::{AsgiToWsgi, EventLoop, WsgiToAsgi};
pub use error::BridgeError;
