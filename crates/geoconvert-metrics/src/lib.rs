//! geoconvert-metrics — observability for the conversion service.
//!
//! Counts conversions and inspections per outcome, keeps a bounded window
//! of latency samples, and renders the Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record()    ← called once per API operation
//!   └── snapshot()  → Vec<OperationSnapshot>
//!
//! Prometheus exposition
//!   └── render_prometheus(snapshots, gauges) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsCollector, OperationSnapshot, Sample};
pub use prometheus::{Gauges, render_prometheus};
