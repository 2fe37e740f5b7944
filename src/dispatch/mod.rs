//! Type-routed dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! frame from FrameStream
//!     → envelope.rs (extract `type`, keep payload opaque)
//!     → handler.rs (HandlerTable lookup)
//!     → context.rs (MessageContext: connection + hub + envelope)
//!     → handler runs on the connection's own loop
//!     → replies / broadcasts through hub.rs
//! ```
//!
//! # Design Decisions
//! - The handler table is frozen when the dispatcher is built
//! - Lifecycle hooks live in the same table under reserved keys
//! - A missing handler is a normal outcome answered with an error envelope

pub mod context;
pub mod engine;
pub mod envelope;
pub mod handler;
pub mod hub;

pub use context::MessageContext;
pub use engine::{Admission, Disconnect, Dispatcher, DispatcherBuilder};
pub use envelope::{error_frame, Envelope, Inbound};
pub use handler::{Handler, HandlerError, HandlerResult, HandlerTable};
pub use hub::{BroadcastReport, Hub, HubError};
