//! Error definitions shared by both bridge directions.

use thiserror::Error;

/// Errors that can occur while bridging an application call.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The peer or the application broke the message protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer disconnected before the request completed.
    #[error("peer disconnected")]
    Disconnected,

    /// A stream endpoint was closed underneath the caller.
    #[error("stream closed")]
    Closed,

    /// A bounded wait expired.
    #[error("operation timed out")]
    Timeout,

    /// The wrapped application failed.
    #[error("application error: {0}")]
    App(String),

    /// The scheduler or worker pool failed to run the application.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl BridgeError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn app(message: impl Into<String>) -> Self {
        Self::App(message.into())
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler(message.into())
    }

    /// Whether this error was caused by the peer going away, as opposed to
    /// a fault in the application or the bridge itself.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
