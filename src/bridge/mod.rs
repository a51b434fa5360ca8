//! The two adapters and the scheduler lifetime they share.
//!
//! `WsgiToAsgi` presents a blocking application behind the event-driven
//! calling convention; `AsgiToWsgi` is the reverse. Each request owns a
//! fresh pair of bounded streams; the worker pool and the event loop are
//! per-adapter and shared across that adapter's requests.

mod asgi_to_wsgi;
mod event_loop;
mod wsgi_to_asgi;

pub use asgi_to_wsgi::AsgiToWsgi;
pub use event_loop::EventLoop;
pub use wsgi_to_asgi::WsgiToAsgi;
