//! Startup orchestration.
//!
//! # Responsibilities
//! - Install metrics when enabled
//! - Bind the listener
//! - Serve until a signal arrives
//!
//! Logging is initialised by the caller from the loaded config. A config that
//! fails to load is reported through a default-level subscriber instead.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::http::WsServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid bind address '{0}'")]
    Address(String),

    #[error("failed to bind: {0}")]
    Bind(std::io::Error),

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Bind and serve `dispatcher` with `config` until SIGINT/SIGTERM.
pub async fn serve<C: Send + Sync + 'static>(config: ServerConfig, dispatcher: Dispatcher<C>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let addr: SocketAddr = config
        .listener
        .bind_address
        .parse()
        .map_err(|_| StartupError::Address(config.listener.bind_address.clone()))?;
    let listener = TcpListener::bind(addr).await.map_err(StartupError::Bind)?;

    let shutdown = Shutdown::new();
    signals::trigger_on_signal(shutdown.clone());

    WsServer::new(config.listener, dispatcher)
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Serve)
}
