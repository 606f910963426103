//! Observability for RouteCodex: tracing setup, scrubbed request/response
//! snapshots, and Prometheus metrics.

pub mod logger;
pub mod metrics;
pub mod scrub;
pub mod snapshot;

pub use metrics::MetricsCollector;
pub use snapshot::{LogSnapshotSink, NullSnapshotSink, Snapshot, SnapshotKind, SnapshotSink};
