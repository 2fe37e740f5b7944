//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router with the websocket route
//! - Capture request metadata for the prepare hook
//! - Hand upgraded sockets to the dispatcher
//! - Serve until the shutdown signal fires, then drain open connections

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{HeaderMap, Uri},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ListenerConfig;
use crate::connection::RequestMeta;
use crate::dispatch::Dispatcher;

/// State injected into the upgrade handler.
struct AppState<C: Send + Sync + 'static> {
    dispatcher: Dispatcher<C>,
    max_frame_bytes: usize,
}

impl<C: Send + Sync + 'static> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

/// Websocket server bound to one path.
pub struct WsServer<C: Send + Sync + 'static = ()> {
    config: ListenerConfig,
    dispatcher: Dispatcher<C>,
}

impl<C: Send + Sync + 'static> WsServer<C> {
    pub fn new(config: ListenerConfig, dispatcher: Dispatcher<C>) -> Self {
        Self { config, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher<C> {
        &self.dispatcher
    }

    /// Build the axum router. Serve it with connect info enabled.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
        };
        Router::new()
            .route(&self.config.path, get(upgrade_handler::<C>))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// On shutdown, stops accepting, ends every dispatch loop and waits up to
    /// `drain_timeout_secs` for their teardown.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            path = %self.config.path,
            "WebSocket server starting"
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let dispatcher = self.dispatcher.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
                // Upgraded sockets are not tracked by axum; stop their loops here.
                dispatcher.shutdown();
            })
            .await?;

        let drain = Duration::from_secs(self.config.drain_timeout_secs);
        if tokio::time::timeout(drain, self.dispatcher.wait_idle()).await.is_err() {
            tracing::warn!(
                remaining = self.dispatcher.active(),
                timeout_secs = self.config.drain_timeout_secs,
                "Connections still open after drain timeout"
            );
        }

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

async fn upgrade_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let meta = RequestMeta {
        remote_addr: Some(remote_addr),
        uri,
        headers,
    };
    let dispatcher = state.dispatcher;

    ws.max_message_size(state.max_frame_bytes)
        .on_failed_upgrade(move |e| {
            tracing::warn!(remote_addr = %remote_addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let reason = dispatcher.serve(socket, meta).await;
            tracing::trace!(remote_addr = %remote_addr, reason = ?reason, "Connection task finished");
        })
}
