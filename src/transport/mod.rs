//! Frame transport collaborators.
//!
//! # Data Flow
//! ```text
//! upgraded duplex connection (websocket, in-memory pair, ...)
//!     → Duplex::into_split()
//!     → FrameSink   (owned by the connection handle, behind its write lock)
//!     → FrameStream (owned by the connection's dispatch loop, single reader)
//! ```
//!
//! # Design Decisions
//! - The engine never sees the concrete transport, only these traits
//! - A frame is the unit of atomicity: one `send_frame` is one whole frame
//! - Peer close surfaces as `TransportError::Closed` on the read path

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;

/// One discrete unit of data carried by a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Raw bytes of the frame regardless of its kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes.as_slice(),
        }
    }

    /// Frame contents as text, if it is a valid UTF-8 frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text.as_str()),
            Frame::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame::Binary(bytes)
    }
}

/// Errors raised by a transport while reading, writing or closing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed (locally or by the peer).
    #[error("connection closed")]
    Closed,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(String),
}

/// Write half of a duplex connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one complete frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection. Further writes fail.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a duplex connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Read the next frame. Returns `TransportError::Closed` once the peer is gone.
    async fn next_frame(&mut self) -> Result<Frame, TransportError>;
}

/// An established duplex connection that can be split into its halves.
pub trait Duplex: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    fn into_split(self) -> (Self::Sink, Self::Stream);
}
