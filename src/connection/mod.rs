//! Connection subsystem.
//!
//! # Data Flow
//! ```text
//! Upgraded transport
//!     → id.rs (fresh random identifier)
//!     → handle.rs (write-locked sink, request metadata, opaque context)
//!     → registry.rs (id → handle, shared by every dispatch loop)
//!
//! Connection lifetime:
//!     Registered → (reading / writing) → Unregistered → Closed
//! ```
//!
//! # Design Decisions
//! - The registry guards only the mapping, never a network call
//! - Writes are serialized per handle, so any task may write to any connection
//! - Registration is a guard: dropping it removes the entry on every exit path

pub mod handle;
pub mod id;
pub mod registry;

pub use handle::{Connection, RequestMeta};
pub use id::ConnectionId;
pub use registry::{Registration, Registry};
