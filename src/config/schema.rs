//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, websocket path).
    pub listener: ListenerConfig,

    /// Dispatch engine behaviour.
    pub dispatch: DispatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// HTTP path that accepts websocket upgrades.
    pub path: String,

    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,

    /// How long shutdown waits for open connections to finish teardown.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            path: "/ws".to_string(),
            max_frame_bytes: 1024 * 1024,
            drain_timeout_secs: 10,
        }
    }
}

/// What the engine does after a handler reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerErrorPolicy {
    /// Send an error envelope to the peer and keep reading.
    #[default]
    Notify,
    /// Send an error envelope (best-effort) and close the connection.
    Close,
}

/// Dispatch engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// `type` of the error envelope, e.g. "error" or "Error".
    pub error_type: String,

    /// Reserved key of the connect lifecycle hook.
    pub connect_key: String,

    /// Reserved key of the disconnect lifecycle hook.
    pub disconnect_key: String,

    /// Reaction to handler failures.
    pub on_handler_error: HandlerErrorPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            error_type: "error".to_string(),
            connect_key: "connected".to_string(),
            disconnect_key: "disconnected".to_string(),
            on_handler_error: HandlerErrorPolicy::Notify,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
