//! Configuration validation logic.

use crate::config::schema::{AsgiBridgeConfig, WsgiBridgeConfig};

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a [`WsgiBridgeConfig`] for semantic correctness.
pub fn validate_wsgi_config(config: &WsgiBridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.workers == 0 {
        errors.push(ValidationError("workers must be > 0".to_string()));
    }
    if config.send_queue_size == 0 {
        errors.push(ValidationError("send_queue_size must be > 0".to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate an [`AsgiBridgeConfig`] for semantic correctness.
pub fn validate_asgi_config(config: &AsgiBridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.send_queue_size == 0 {
        errors.push(ValidationError("send_queue_size must be > 0".to_string()));
    }
    if config.request_chunk_size == 0 {
        errors.push(ValidationError(
            "request_chunk_size must be > 0".to_string(),
        ));
    }
    if let Some(wait) = config.wait_time_secs {
        if !wait.is_finite() || wait < 0.0 {
            errors.push(ValidationError(
                "wait_time_secs must be a non-negative finite number".to_string(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
