//! Prometheus metrics, structured logging and the event log for binmm.
//!
//! - Prometheus metrics for fills, reconciliation, exits, order churn, safety
//! - Structured logging with tracing (JSON in production)
//! - Append-only JSON-lines event log for post-hoc reconstruction
//! - Periodic metrics snapshot for operators

pub mod error;
pub mod event_log;
pub mod logging;
pub mod metrics;
pub mod snapshot;

pub use error::{TelemetryError, TelemetryResult};
pub use event_log::{Event, EventSink, JsonlEventLog, MemoryEventSink, NullEventSink};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use snapshot::MetricsSnapshot;
