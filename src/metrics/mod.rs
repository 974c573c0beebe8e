//! Metrics module for Prometheus-based monitoring.
//!
//! Covers queue depths, admission, stage outcomes and fleet scaling.
//!
//! # Example
//!
//! ```ignore
//! use gridflow::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_tasks_started("essim", 10);
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MessageOutcome, MetricsCollector};
pub use prometheus::{
    export_metrics, export_metrics_named, init_metrics, QUEUE_DEPTH_METRIC, REGISTRY,
};
