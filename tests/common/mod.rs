//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ws_dispatch::config::ListenerConfig;
use ws_dispatch::dispatch::Dispatcher;
use ws_dispatch::http::WsServer;
use ws_dispatch::lifecycle::Shutdown;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `dispatcher` on an ephemeral localhost port.
pub async fn start_server<C: Send + Sync + 'static>(dispatcher: Dispatcher<C>) -> (SocketAddr, Shutdown) {
    let (addr, shutdown, _server) = spawn_server(dispatcher).await;
    (addr, shutdown)
}

/// Like `start_server`, also returning the server task.
pub async fn spawn_server<C: Send + Sync + 'static>(
    dispatcher: Dispatcher<C>,
) -> (SocketAddr, Shutdown, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = WsServer::new(ListenerConfig::default(), dispatcher);
    let task = tokio::spawn(server.run(listener, rx));

    (addr, shutdown, task)
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{}/ws", addr)
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(ws_url(addr)).await.unwrap();
    client
}

pub async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON. Panics on timeout or close.
pub async fn recv_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// True once the server has closed the connection.
pub async fn closed_by_server(client: &mut Client) -> bool {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, client.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// Poll `check` until it holds or the deadline passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
