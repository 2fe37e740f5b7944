//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and the websocket path
//! - Keep the reserved lifecycle keys usable and distinct
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.path must start with '/', got '{0}'")]
    InvalidPath(String),

    #[error("listener.max_frame_bytes must be greater than zero")]
    ZeroFrameLimit,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("dispatch.connect_key and dispatch.disconnect_key are both '{0}'")]
    DuplicateLifecycleKey(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if !config.listener.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath(config.listener.path.clone()));
    }
    if config.listener.max_frame_bytes == 0 {
        errors.push(ValidationError::ZeroFrameLimit);
    }

    let dispatch = &config.dispatch;
    for (field, value) in [
        ("dispatch.error_type", &dispatch.error_type),
        ("dispatch.connect_key", &dispatch.connect_key),
        ("dispatch.disconnect_key", &dispatch.disconnect_key),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::Empty(field));
        }
    }
    if !dispatch.connect_key.is_empty() && dispatch.connect_key == dispatch.disconnect_key {
        errors.push(ValidationError::DuplicateLifecycleKey(dispatch.connect_key.clone()));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
