//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine, registry and HTTP layer produce:
//!     → logging.rs (structured tracing events, connection_id on every line)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until an exporter is installed
//! - Message types are only used as labels once a handler matched them

pub mod logging;
pub mod metrics;
