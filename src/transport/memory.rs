//! In-process duplex transport.
//!
//! Used by tests and by embedders that want to drive the engine without a
//! network. `pair()` returns the server side (handed to the engine) and the
//! peer side (held by whoever plays the remote client).

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Duplex, Frame, FrameSink, FrameStream, TransportError};

/// Create a connected in-memory transport and its peer.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: to_peer,
            rx: from_peer,
        },
        MemoryPeer {
            tx: Some(to_server),
            rx: from_server,
        },
    )
}

/// Server side of an in-memory pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Duplex for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn into_split(self) -> (MemorySink, MemoryStream) {
        (MemorySink { tx: Some(self.tx) }, MemoryStream { rx: self.rx })
    }
}

#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's receive side.
        self.tx = None;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

/// Remote end of an in-memory pair.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.into()).map_err(|_| TransportError::Closed)
    }

    /// Receive the next frame written by the server, `None` once it closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Receive the next frame and decode it as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.recv().await?;
        serde_json::from_slice(frame.as_bytes()).ok()
    }

    /// Close the peer's write direction; the server observes a peer close.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
