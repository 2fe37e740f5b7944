//! End-to-end dispatch tests over real websocket connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

use ws_dispatch::config::{DispatchConfig, HandlerErrorPolicy};
use ws_dispatch::connection::{ConnectionId, RequestMeta};
use ws_dispatch::dispatch::{Admission, Dispatcher, Envelope, HandlerError, HandlerResult, MessageContext};

mod common;

fn counting_hook(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(MessageContext) -> std::future::Ready<HandlerResult> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

async fn echo(ctx: MessageContext) -> HandlerResult {
    let data = ctx.data().cloned().unwrap_or(Value::Null);
    ctx.reply(ctx.kind(), data).await
}

async fn relay(ctx: MessageContext) -> HandlerResult {
    let envelope = Envelope::with_data("message", ctx.data().cloned().unwrap_or(Value::Null))?;
    let report = ctx.hub().broadcast_except(&envelope, ctx.id().as_str()).await;
    ctx.reply("broadcast", report).await
}

#[tokio::test]
async fn test_echo_and_unknown_type() {
    let dispatcher = Dispatcher::builder(DispatchConfig::default()).on("echo", echo).build();
    let (addr, _shutdown) = common::start_server(dispatcher).await;
    let mut client = common::connect(addr).await;

    common::send_json(&mut client, json!({"type": "echo", "data": {"n": 1}})).await;
    assert_eq!(common::recv_json(&mut client).await, json!({"type": "echo", "data": {"n": 1}}));

    common::send_json(&mut client, json!({"type": "bogus"})).await;
    let reply = common::recv_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("bogus"));

    // Still serving after the unknown type.
    common::send_json(&mut client, json!({"type": "echo", "data": "again"})).await;
    assert_eq!(common::recv_json(&mut client).await["data"], "again");
}

#[tokio::test]
async fn test_reserved_keys_are_not_routable() {
    let connected = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::builder(DispatchConfig::default())
        .on_connect(counting_hook(&connected))
        .build();
    let (addr, _shutdown) = common::start_server(dispatcher).await;
    let mut client = common::connect(addr).await;

    common::send_json(&mut client, json!({"type": "connected"})).await;
    let reply = common::recv_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(connected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_many_connections_many_messages() {
    const CONNECTIONS: usize = 10;
    const MESSAGES: usize = 1000;

    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::builder(DispatchConfig::default())
        .on("h0", echo)
        .on("h1", echo)
        .on("h2", echo)
        .on_connect(counting_hook(&connected))
        .on_disconnect(counting_hook(&disconnected))
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;

    let mut tasks = Vec::new();
    for conn in 0..CONNECTIONS {
        tasks.push(tokio::spawn(async move {
            let client = common::connect(addr).await;
            let (mut tx, mut rx) = client.split();

            let writer = tokio::spawn(async move {
                for seq in 0..MESSAGES {
                    let msg = json!({"type": format!("h{}", seq % 3), "data": {"conn": conn, "seq": seq}});
                    tx.send(Message::text(msg.to_string())).await.unwrap();
                }
                tx
            });

            let mut seq = 0;
            while seq < MESSAGES {
                let msg = tokio::time::timeout(common::RECV_TIMEOUT, rx.next())
                    .await
                    .expect("timed out waiting for reply")
                    .expect("connection closed")
                    .unwrap();
                let Message::Text(text) = msg else { continue };
                let reply: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(reply["type"], format!("h{}", seq % 3));
                assert_eq!(reply["data"]["conn"], conn);
                assert_eq!(reply["data"]["seq"], seq);
                seq += 1;
            }

            let mut tx = writer.await.unwrap();
            let _ = tx.close().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(
        common::wait_until(Duration::from_secs(5), || {
            disconnected.load(Ordering::SeqCst) == CONNECTIONS && registry.is_empty()
        })
        .await
    );
    assert_eq!(connected.load(Ordering::SeqCst), CONNECTIONS);
}

#[tokio::test]
async fn test_silent_connection_lifecycle() {
    let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let record = |seen: &Arc<Mutex<Vec<(String, String)>>>| {
        let seen = Arc::clone(seen);
        move |ctx: MessageContext| {
            seen.lock().unwrap().push((ctx.kind().to_owned(), ctx.id().to_string()));
            std::future::ready(Ok::<(), HandlerError>(()))
        }
    };
    let dispatcher = Dispatcher::builder(DispatchConfig::default())
        .on_connect(record(&seen))
        .on_disconnect(record(&seen))
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;

    let mut client = common::connect(addr).await;
    assert!(common::wait_until(Duration::from_secs(5), || registry.len() == 1).await);
    client.close(None).await.unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() == 2).await);
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0].0, "connected");
    assert_eq!(seen[1].0, "disconnected");
    assert_eq!(seen[0].1, seen[1].1);
    assert!(!registry.contains(&seen[0].1));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_broadcast_during_churn() {
    const STABLE: usize = 5;
    const ROUNDS: usize = 20;

    let dispatcher = Dispatcher::builder(DispatchConfig::default())
        .on("broadcast", relay)
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;

    let mut stable = Vec::new();
    for _ in 0..STABLE {
        stable.push(common::connect(addr).await);
    }
    assert!(common::wait_until(Duration::from_secs(5), || registry.len() == STABLE).await);

    let churn = tokio::spawn(async move {
        for _ in 0..ROUNDS {
            let mut client = common::connect(addr).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
            let _ = client.close(None).await;
        }
    });

    let mut sender = stable.remove(0);
    for round in 0..ROUNDS {
        common::send_json(&mut sender, json!({"type": "broadcast", "data": round})).await;
        let reply = common::recv_json(&mut sender).await;
        assert_eq!(reply["type"], "broadcast");
        assert!(reply["data"]["delivered"].as_u64().unwrap() >= (STABLE - 1) as u64);
    }
    churn.await.unwrap();

    for client in stable.iter_mut() {
        for round in 0..ROUNDS {
            let msg = common::recv_json(client).await;
            assert_eq!(msg, json!({"type": "message", "data": round}));
        }
    }

    assert!(common::wait_until(Duration::from_secs(5), || registry.len() == STABLE).await);
}

#[tokio::test]
async fn test_prepare_rejects_and_attaches_context() {
    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let remote_seen = Arc::new(AtomicUsize::new(0));
    let remote = Arc::clone(&remote_seen);

    let dispatcher = Dispatcher::<String>::builder(DispatchConfig::default())
        .prepare(move |_id: &ConnectionId, meta: &RequestMeta| {
            if meta.remote_addr.is_some() {
                remote.fetch_add(1, Ordering::SeqCst);
            }
            match meta.uri.query() {
                Some("reject=1") => Admission::Reject,
                Some(q) => Admission::Accept(q.strip_prefix("name=").map(str::to_owned)),
                None => Admission::Accept(None),
            }
        })
        .on_connect({
            let connected = Arc::clone(&connected);
            move |_ctx: MessageContext<String>| {
                connected.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok::<(), HandlerError>(()))
            }
        })
        .on_disconnect({
            let disconnected = Arc::clone(&disconnected);
            move |_ctx: MessageContext<String>| {
                disconnected.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok::<(), HandlerError>(()))
            }
        })
        .on("whoami", |ctx: MessageContext<String>| async move {
            let name = ctx.context().map(|name| name.as_str().to_owned());
            ctx.reply("whoami", name).await
        })
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;

    let (mut rejected, _) = tokio_tungstenite::connect_async(format!("{}?reject=1", common::ws_url(addr)))
        .await
        .unwrap();
    assert!(common::closed_by_server(&mut rejected).await);
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    assert_eq!(disconnected.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());

    let (mut alice, _) = tokio_tungstenite::connect_async(format!("{}?name=alice", common::ws_url(addr)))
        .await
        .unwrap();
    common::send_json(&mut alice, json!({"type": "whoami"})).await;
    assert_eq!(common::recv_json(&mut alice).await, json!({"type": "whoami", "data": "alice"}));
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(remote_seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_handler_error_close_policy() {
    let disconnected = Arc::new(AtomicUsize::new(0));
    let config = DispatchConfig {
        on_handler_error: HandlerErrorPolicy::Close,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::builder(config)
        .on("fail", |_ctx: MessageContext| async move { Err::<(), _>(HandlerError::msg("boom")) })
        .on_disconnect(counting_hook(&disconnected))
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;
    let mut client = common::connect(addr).await;

    common::send_json(&mut client, json!({"type": "fail"})).await;
    let reply = common::recv_json(&mut client).await;
    assert_eq!(reply, json!({"type": "error", "message": "boom"}));
    assert!(common::closed_by_server(&mut client).await);

    assert!(
        common::wait_until(Duration::from_secs(5), || {
            disconnected.load(Ordering::SeqCst) == 1 && registry.is_empty()
        })
        .await
    );
}

#[tokio::test]
async fn test_plain_http_request_is_refused() {
    let dispatcher = Dispatcher::builder(DispatchConfig::default()).on("echo", echo).build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, _shutdown) = common::start_server(dispatcher).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(common::RECV_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 4"), "unexpected response: {}", response);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_drains_open_connections() {
    let disconnected = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::builder(DispatchConfig::default())
        .on("echo", echo)
        .on_disconnect(counting_hook(&disconnected))
        .build();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, shutdown, server) = common::spawn_server(dispatcher).await;

    let mut client = common::connect(addr).await;
    common::send_json(&mut client, json!({"type": "echo", "data": "before"})).await;
    assert_eq!(common::recv_json(&mut client).await["data"], "before");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not drain")
        .unwrap()
        .unwrap();

    // Teardown finished before run() returned.
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty());
    assert!(common::closed_by_server(&mut client).await);

    // The listener is gone too.
    assert!(tokio_tungstenite::connect_async(common::ws_url(addr)).await.is_err());
}
