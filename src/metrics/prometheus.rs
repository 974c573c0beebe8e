//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by gridflow and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all gridflow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Last observed queue depth, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Total scenarios admitted into the pipeline.
pub static SCENARIOS_ADMITTED: OnceLock<Counter> = OnceLock::new();

/// Admission runs skipped because a monitored queue was saturated, labeled by queue.
pub static ADMISSION_SKIPPED: OnceLock<CounterVec> = OnceLock::new();

/// Stage messages by outcome (forwarded, failed, retried, skipped, dead_lettered).
pub static STAGE_MESSAGES: OnceLock<CounterVec> = OnceLock::new();

/// Stage batch processing duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Running tasks observed per family.
pub static RUNNING_TASKS: OnceLock<GaugeVec> = OnceLock::new();

/// Total tasks started by the autoscaler, labeled by family.
pub static TASKS_STARTED: OnceLock<CounterVec> = OnceLock::new();

/// Fleet backend errors, labeled by family.
pub static FLEET_ERRORS: OnceLock<CounterVec> = OnceLock::new();

/// Messages moved to a dead-letter queue, labeled by source queue.
pub static DEAD_LETTERED: OnceLock<CounterVec> = OnceLock::new();

/// Number of active stage workers in this process.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new(QUEUE_DEPTH_METRIC, "Last observed queue depth"),
        &["queue"],
    )?;

    // Admission metrics
    let scenarios_admitted = Counter::new(
        "gridflow_scenarios_admitted_total",
        "Total scenarios admitted into the pipeline",
    )?;

    let admission_skipped = CounterVec::new(
        Opts::new(
            "gridflow_admission_skipped_total",
            "Admission runs skipped because a monitored queue was saturated",
        ),
        &["queue"],
    )?;

    // Stage metrics
    let stage_messages = CounterVec::new(
        Opts::new("gridflow_stage_messages_total", "Stage messages by outcome"),
        &["stage", "outcome"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "gridflow_stage_batch_duration_seconds",
            "Stage batch processing duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["stage"],
    )?;

    // Fleet metrics
    let running_tasks = GaugeVec::new(
        Opts::new("gridflow_running_tasks", "Running tasks observed per family"),
        &["family"],
    )?;

    let tasks_started = CounterVec::new(
        Opts::new("gridflow_tasks_started_total", "Total tasks started"),
        &["family"],
    )?;

    let fleet_errors = CounterVec::new(
        Opts::new("gridflow_fleet_errors_total", "Fleet backend errors"),
        &["family"],
    )?;

    let dead_lettered = CounterVec::new(
        Opts::new(
            "gridflow_dead_lettered_total",
            "Messages moved to a dead-letter queue",
        ),
        &["queue"],
    )?;

    let active_workers = Gauge::new("gridflow_active_workers", "Number of active stage workers")?;

    // Register all metrics with the registry
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(scenarios_admitted.clone()))?;
    registry.register(Box::new(admission_skipped.clone()))?;
    registry.register(Box::new(stage_messages.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(running_tasks.clone()))?;
    registry.register(Box::new(tasks_started.clone()))?;
    registry.register(Box::new(fleet_errors.clone()))?;
    registry.register(Box::new(dead_lettered.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may have won; its metrics stay in place
    let _ = REGISTRY.set(registry);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = SCENARIOS_ADMITTED.set(scenarios_admitted);
    let _ = ADMISSION_SKIPPED.set(admission_skipped);
    let _ = STAGE_MESSAGES.set(stage_messages);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = RUNNING_TASKS.set(running_tasks);
    let _ = TASKS_STARTED.set(tasks_started);
    let _ = FLEET_ERRORS.set(fleet_errors);
    let _ = DEAD_LETTERED.set(dead_lettered);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Name of the per-queue depth gauge.
pub const QUEUE_DEPTH_METRIC: &str = "gridflow_queue_depth";

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    export_matching(|_| true)
}

/// Export only the metric families named in `names`.
pub fn export_metrics_named(names: &[&str]) -> String {
    export_matching(|family| names.contains(&family))
}

fn export_matching(keep: impl Fn(&str) -> bool) -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families: Vec<_> = registry
        .gather()
        .into_iter()
        .filter(|family| keep(family.name()))
        .collect();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
