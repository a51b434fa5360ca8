//! Configuration schema definitions.
//!
//! This module defines the tuning knobs for both bridge directions. All
//! types derive Serde traits so embedding services can deserialize them
//! from their own config formats.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of worker-pool slots for blocking applications.
pub const DEFAULT_WORKERS: usize = 10;

/// Default capacity, in items, of each per-request stream.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 10;

/// Default request-body read size for the event-to-blocking direction.
pub const DEFAULT_REQUEST_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for presenting a blocking application as an event-driven
/// one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WsgiBridgeConfig {
    /// Maximum concurrently running blocking application invocations.
    pub workers: usize,

    /// Capacity of the per-request body and response streams.
    pub send_queue_size: usize,
}

impl Default for WsgiBridgeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
        }
    }
}

/// Configuration for presenting an event-driven application as a blocking
/// one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AsgiBridgeConfig {
    /// How long to wait, after the response iterator closes, for the
    /// application task to finish its background work. `None` waits
    /// forever; on expiry the task is cancelled.
    pub wait_time_secs: Option<f64>,

    /// Capacity of the per-request body and response streams.
    pub send_queue_size: usize,

    /// Read size for request-body chunks fed to the application.
    pub request_chunk_size: usize,
}

impl Default for AsgiBridgeConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: None,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            request_chunk_size: DEFAULT_REQUEST_CHUNK_SIZE,
        }
    }
}

impl AsgiBridgeConfig {
    pub fn wait_time(&self) -> Option<Duration> {
        self.wait_time_secs.map(Duration::from_secs_f64)
    }
}
