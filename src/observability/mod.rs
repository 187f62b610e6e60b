//! Observability subsystem
//!
//! - Structured logging through `tracing`
//! - Gateway counters exposed at `/metrics`
//!
//! Observability is read-only: nothing here influences request handling.

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
