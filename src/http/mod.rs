//! HTTP binding subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → axum Router (TraceLayer)
//!     → GET <listener.path> with websocket upgrade headers
//!     → server.rs captures RequestMeta, completes the upgrade
//!     → Dispatcher::serve on the upgraded socket (one task per connection)
//! ```
//!
//! # Design Decisions
//! - Requests that are not valid upgrades are refused by axum before any
//!   identifier is generated
//! - Frame size is capped at the websocket layer

pub mod server;

pub use server::WsServer;
