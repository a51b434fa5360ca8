//! Adapter configuration.
//!
//! # Design Decisions
//! - Plain structs with defaults; no config files, CLI flags or
//!   environment variables are read here
//! - All fields have defaults so embedding code can name only what it
//!   overrides
//! - Validation separates syntactic (serde) from semantic checks

mod schema;
mod validation;

pub use schema::{
    AsgiBridgeConfig, WsgiBridgeConfig, DEFAULT_REQUEST_CHUNK_SIZE, DEFAULT_SEND_QUEUE_SIZE,
    DEFAULT_WORKERS,
};
pub use validation::{validate_asgi_config, validate_wsgi_config, ValidationError};
