//! WebSocket adapter for the axum upgrade.
//!
//! # Responsibilities
//! - Split an upgraded `WebSocket` into sink and stream halves
//! - Map text/binary messages to frames
//! - Surface close frames and stream end as `TransportError::Closed`
//!
//! Ping/pong control frames are answered by the websocket layer itself and
//! never reach the dispatch loop.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use super::{Duplex, Frame, FrameSink, FrameStream, TransportError};

impl Duplex for WebSocket {
    type Sink = WebSocketSink;
    type Stream = WebSocketStream;

    fn into_split(self) -> (WebSocketSink, WebSocketStream) {
        let (sink, stream) = self.split();
        (WebSocketSink { inner: sink }, WebSocketStream { inner: stream })
    }
}

pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.inner.send(message).await.map_err(map_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; the close frame is best-effort.
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner.close().await.map_err(map_error)
    }
}

pub struct WebSocketStream {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameStream for WebSocketStream {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes.to_vec())),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    tracing::trace!(reason = ?frame, "Peer sent close frame");
                    return Err(TransportError::Closed);
                }
                Some(Err(e)) => return Err(map_error(e)),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

fn map_error(err: axum::Error) -> TransportError {
    TransportError::Io(err.to_string())
}
