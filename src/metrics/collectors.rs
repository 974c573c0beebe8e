//! High-level metric recording for gridflow operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics. Every method is a
//! no-op until `init_metrics()` has been called, so library code can record
//! unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, ADMISSION_SKIPPED, DEAD_LETTERED, FLEET_ERRORS, QUEUE_DEPTH, RUNNING_TASKS,
    SCENARIOS_ADMITTED, STAGE_DURATION, STAGE_MESSAGES, TASKS_STARTED,
};

/// Outcome label of a stage message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Transform succeeded and the state update was written.
    Forwarded,
    /// Transform succeeded but the row had already moved on.
    Superseded,
    /// Transform failed; message parked without retry.
    Failed,
    /// Transform failed; message re-enqueued for another attempt.
    Retried,
    /// Message carried a state this stage does not consume.
    Skipped,
    /// Message moved to the dead-letter queue.
    DeadLettered,
}

impl MessageOutcome {
    /// Metric label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Forwarded => "forwarded",
            MessageOutcome::Superseded => "superseded",
            MessageOutcome::Failed => "failed",
            MessageOutcome::Retried => "retried",
            MessageOutcome::Skipped => "skipped",
            MessageOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Metrics collector for recording gridflow operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Update the last observed depth of a queue.
    pub fn update_queue_depth(&self, queue: &str, depth: u64) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.with_label_values(&[queue]).set(depth as f64);
        }

        tracing::trace!(queue = queue, depth = depth, "Updated queue depth metric");
    }

    /// Record scenarios admitted by one gate run.
    pub fn record_admitted(&self, count: usize) {
        if let Some(admitted) = SCENARIOS_ADMITTED.get() {
            admitted.inc_by(count as f64);
        }
    }

    /// Record an admission run skipped because `queue` was saturated.
    pub fn record_admission_skipped(&self, queue: &str) {
        if let Some(skipped) = ADMISSION_SKIPPED.get() {
            skipped.with_label_values(&[queue]).inc();
        }
    }

    /// Record one message outcome for a stage.
    pub fn record_stage_outcome(&self, stage: &str, outcome: MessageOutcome) {
        if let Some(messages) = STAGE_MESSAGES.get() {
            messages
                .with_label_values(&[stage, outcome.as_str()])
                .inc();
        }
    }

    /// Record how long a stage batch took.
    pub fn record_stage_batch(&self, stage: &str, duration_secs: f64) {
        if let Some(duration) = STAGE_DURATION.get() {
            duration.with_label_values(&[stage]).observe(duration_secs);
        }

        tracing::trace!(
            stage = stage,
            duration_secs = duration_secs,
            "Recorded stage batch metric"
        );
    }

    /// Update the running task count of a family.
    pub fn update_running_tasks(&self, family: &str, running: u64) {
        if let Some(running_tasks) = RUNNING_TASKS.get() {
            running_tasks.with_label_values(&[family]).set(running as f64);
        }
    }

    /// Record tasks started for a family.
    pub fn record_tasks_started(&self, family: &str, count: usize) {
        if let Some(started) = TASKS_STARTED.get() {
            started.with_label_values(&[family]).inc_by(count as f64);
        }
    }

    /// Record a fleet backend error for a family.
    pub fn record_fleet_error(&self, family: &str) {
        if let Some(errors) = FLEET_ERRORS.get() {
            errors.with_label_values(&[family]).inc();
        }
    }

    /// Record a message moved to the dead-letter queue of `queue`.
    pub fn record_dead_letter(&self, queue: &str) {
        if let Some(dead_lettered) = DEAD_LETTERED.get() {
            dead_lettered.with_label_values(&[queue]).inc();
        }
    }

    /// Increment the count of active workers by 1.
    pub fn inc_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    /// Decrement the count of active workers by 1.
    pub fn dec_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(MessageOutcome::Forwarded.as_str(), "forwarded");
        assert_eq!(MessageOutcome::DeadLettered.as_str(), "dead_lettered");
    }

    #[test]
    fn test_record_fleet_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_running_tasks("collector-test-family", 3);
        collector.record_tasks_started("collector-test-family", 7);
        collector.record_fleet_error("collector-test-family");

        let metrics = export_metrics();
        assert!(metrics.contains("gridflow_tasks_started_total{family=\"collector-test-family\"} 7"));
        assert!(metrics.contains("gridflow_running_tasks{family=\"collector-test-family\"} 3"));
    }

    #[test]
    fn test_record_stage_and_admission_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_stage_outcome("collector-test-stage", MessageOutcome::Skipped);
        collector.record_stage_batch("collector-test-stage", 2.5);
        collector.record_admission_skipped("collector-test-queue");
        collector.update_queue_depth("collector-test-queue", 21);
        collector.record_dead_letter("collector-test-queue");

        let metrics = export_metrics();
        assert!(metrics.contains("outcome=\"skipped\""));
        assert!(metrics.contains("gridflow_admission_skipped_total{queue=\"collector-test-queue\"} 1"));
    }

    #[test]
    fn test_workers_gauge() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();
        collector.inc_workers();
        collector.dec_workers();
    }
}
