//! ws-dispatch server
//!
//! Accepts websocket connections, tracks them in a registry and routes each
//! JSON text frame to the handler registered for its `type` field.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──upgrade──▶ http::server ──▶ dispatch::engine (one task per connection)
//!                                              │
//!                                              ├─▶ connection::registry  (id → handle)
//!                                              ├─▶ handler table         (type → handler)
//!                                              └─▶ dispatch::hub         (send / broadcast)
//!
//!     Cross-cutting: config, observability, lifecycle
//! ```
//!
//! The built-in handlers are a small demo surface:
//! - `echo` replies with the same `data`
//! - `whoami` replies with the connection id
//! - `peers` replies with the ids currently registered
//! - `broadcast` relays `data` to every other connection as `message`

use std::path::PathBuf;

use clap::Parser;
use serde_json::{json, Value};

use ws_dispatch::config::{load_config, ObservabilityConfig, ServerConfig};
use ws_dispatch::dispatch::{Dispatcher, Envelope, HandlerError, HandlerResult, MessageContext};
use ws_dispatch::lifecycle;
use ws_dispatch::observability::logging;

#[derive(Parser)]
#[command(name = "ws-dispatch")]
#[command(about = "Websocket server with type-routed JSON dispatch", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                logging::init_logging(&ObservabilityConfig::default());
                tracing::error!(path = %path.display(), error = %e, "Failed to load configuration");
                return Err(e.into());
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("ws-dispatch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        path = %config.listener.path,
        max_frame_bytes = config.listener.max_frame_bytes,
        error_type = %config.dispatch.error_type,
        "Configuration loaded"
    );

    let dispatcher = demo_dispatcher(&config);
    lifecycle::serve(config, dispatcher).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_dispatcher(config: &ServerConfig) -> Dispatcher {
    Dispatcher::builder(config.dispatch.clone())
        .on_connect(|ctx: MessageContext| async move {
            tracing::info!(conn_id = %ctx.id(), "Client connected");
            Ok::<(), HandlerError>(())
        })
        .on_disconnect(|ctx: MessageContext| async move {
            tracing::info!(conn_id = %ctx.id(), "Client disconnected");
            Ok::<(), HandlerError>(())
        })
        .on("echo", |ctx: MessageContext| async move {
            let data = ctx.data().cloned().unwrap_or(Value::Null);
            ctx.reply("echo", data).await
        })
        .on("whoami", |ctx: MessageContext| async move {
            let id = ctx.id().to_string();
            ctx.reply("whoami", json!({ "id": id })).await
        })
        .on("peers", |ctx: MessageContext| async move {
            let ids: Vec<String> = ctx.hub().ids().iter().map(|id| id.to_string()).collect();
            ctx.reply("peers", ids).await
        })
        .on("broadcast", broadcast)
        .build()
}

/// Relay `data` to every other connection and report the delivery counts.
async fn broadcast(ctx: MessageContext) -> HandlerResult {
    let data = ctx.data().cloned().unwrap_or(Value::Null);
    let envelope = Envelope::with_data("message", json!({ "from": ctx.id().as_str(), "data": data }))?;
    let report = ctx.hub().broadcast_except(&envelope, ctx.id().as_str()).await;
    ctx.reply("broadcast", report).await
}
