//! Admission gate: decides whether new scenarios may enter the pipeline.
//!
//! One run:
//!
//! ```text
//! read monitored queues  ──any depth > threshold──▶ skip (no side effects)
//!        │
//!        ▼
//! fetch ≤ batch_size free scenarios
//!        │
//!        ▼
//! hand-off: free → admitted (one batched update), then one message each
//!           to the first stage queue
//! ```

use tracing::{debug, info};

use crate::context::PipelineContext;
use crate::error::AdmissionError;
use crate::handoff::Outgoing;
use crate::metrics::MetricsCollector;
use crate::scenario::{ScenarioMessage, ScenarioUpdate};

/// Result of one admission run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A monitored queue was above its threshold.
    Skipped {
        /// The saturated queue.
        queue: String,
        /// Its observed depth.
        depth: u64,
        /// The threshold it exceeded.
        threshold: u64,
    },
    /// The gate fetched and admitted scenarios.
    Admitted {
        /// Scenarios fetched in the free state.
        fetched: usize,
        /// Rows moved to the admitted state.
        admitted: usize,
        /// Messages enqueued or staged.
        forwarded: usize,
    },
}

impl AdmissionOutcome {
    /// Number of scenarios admitted by this run.
    pub fn admitted(&self) -> usize {
        match self {
            AdmissionOutcome::Skipped { .. } => 0,
            AdmissionOutcome::Admitted { admitted, .. } => *admitted,
        }
    }
}

/// The admission gate.
pub struct AdmissionGate {
    ctx: PipelineContext,
    metrics: MetricsCollector,
}

impl AdmissionGate {
    /// Creates a gate over a pipeline context.
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one admission cycle.
    ///
    /// Store and queue errors abort the cycle. A failure after the state
    /// update leaves admitted scenarios without a message; see
    /// [`HandoffMode`](crate::handoff::HandoffMode).
    pub async fn run_once(&self) -> Result<AdmissionOutcome, AdmissionError> {
        let config = self.ctx.config();
        let rate_limit = config.admission.rate_limit_per_minute;
        let queue = self.ctx.queue();

        for monitor in &config.admission.monitors {
            let depth = queue.approximate_depth(&monitor.queue).await?;
            let threshold = monitor.threshold.resolve(rate_limit);
            self.metrics.update_queue_depth(&monitor.queue, depth);

            if depth > threshold {
                info!(
                    queue = %monitor.queue,
                    depth,
                    threshold,
                    "Downstream queue saturated, not admitting this cycle"
                );
                self.metrics.record_admission_skipped(&monitor.queue);
                return Ok(AdmissionOutcome::Skipped {
                    queue: monitor.queue.clone(),
                    depth,
                    threshold,
                });
            }
        }

        let first_queue = config
            .pipeline
            .first_queue()
            .ok_or(AdmissionError::NoStages)?;
        let states = self.ctx.states();
        let free = states.initial();
        let admitted_state = states.nth(1).ok_or(AdmissionError::NoStages)?;

        let batch_size = config.admission.batch_size();
        let mut scenarios = self.ctx.store().fetch_eligible(free, batch_size).await?;
        scenarios.truncate(batch_size);

        if scenarios.is_empty() {
            debug!("No free scenarios to admit");
            return Ok(AdmissionOutcome::Admitted {
                fetched: 0,
                admitted: 0,
                forwarded: 0,
            });
        }

        let mut updates = Vec::with_capacity(scenarios.len());
        let mut outgoing = Vec::with_capacity(scenarios.len());
        for scenario in &scenarios {
            let mut next = scenario.clone();
            next.state = admitted_state.to_string();
            updates.push(ScenarioUpdate::advance(next.clone(), scenario.state.clone()));
            outgoing.push(Outgoing::new(first_queue, ScenarioMessage::new(next)));
        }

        let report = self.ctx.handoff().commit(&updates, &outgoing).await?;
        self.metrics.record_admitted(report.written.len());

        info!(
            fetched = scenarios.len(),
            admitted = report.written.len(),
            forwarded = report.forwarded,
            queue = %first_queue,
            "Admitted scenarios"
        );

        Ok(AdmissionOutcome::Admitted {
            fetched: scenarios.len(),
            admitted: report.written.len(),
            forwarded: report.forwarded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{ControlConfig, QueueMonitor, Threshold};
    use crate::queue::{MemoryQueue, MessageQueue};
    use crate::scenario::{Scenario, ScenarioKey};
    use crate::store::{MemoryStore, ScenarioStore};

    struct Harness {
        gate: AdmissionGate,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
    }

    fn harness(free: i64, config: ControlConfig) -> Harness {
        let store = Arc::new(MemoryStore::with_scenarios(
            (1..=free).map(|id| Scenario::new(id, "free", format!("runs/{}/", id))),
        ));
        let queue = Arc::new(MemoryQueue::new());
        let ctx = PipelineContext::new(config, store.clone(), queue.clone(), queue.clone())
            .expect("valid context");
        Harness {
            gate: AdmissionGate::new(ctx),
            store,
            queue,
        }
    }

    fn single_monitor(count: u64) -> ControlConfig {
        let mut config = ControlConfig::default();
        config.admission.monitors = vec![QueueMonitor {
            queue: "essim".to_string(),
            threshold: Threshold::Count { count },
        }];
        config
    }

    async fn fill(queue: &MemoryQueue, name: &str, n: usize) {
        for i in 0..n {
            queue.enqueue(name, &format!("m{}", i)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_admits_bounded_batch() {
        let h = harness(25, ControlConfig::default());

        let outcome = h.gate.run_once().await.unwrap();

        // 60 per minute / 6
        assert_eq!(
            outcome,
            AdmissionOutcome::Admitted {
                fetched: 10,
                admitted: 10,
                forwarded: 10
            }
        );
        assert_eq!(h.queue.approximate_depth("esdl").await.unwrap(), 10);
        assert_eq!(h.store.fetch_eligible("free", 100).await.unwrap().len(), 15);
        assert_eq!(
            h.store.state_of(&ScenarioKey::root(1)).as_deref(),
            Some("admitted")
        );
    }

    #[tokio::test]
    async fn test_depth_above_threshold_skips() {
        let h = harness(5, single_monitor(20));
        fill(&h.queue, "essim", 21).await;

        let outcome = h.gate.run_once().await.unwrap();

        assert_eq!(
            outcome,
            AdmissionOutcome::Skipped {
                queue: "essim".to_string(),
                depth: 21,
                threshold: 20
            }
        );
        assert_eq!(outcome.admitted(), 0);
        assert_eq!(h.store.fetch_eligible("free", 100).await.unwrap().len(), 5);
        assert_eq!(h.queue.approximate_depth("esdl").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_depth_at_threshold_proceeds() {
        let h = harness(5, single_monitor(20));
        fill(&h.queue, "essim", 20).await;

        let outcome = h.gate.run_once().await.unwrap();
        assert_eq!(outcome.admitted(), 5);
    }

    #[tokio::test]
    async fn test_rate_limit_threshold() {
        let mut config = ControlConfig::default();
        config.admission.rate_limit_per_minute = 12;
        config.admission.monitors = vec![QueueMonitor {
            queue: "essim".to_string(),
            threshold: Threshold::RateLimitDivisor {
                rate_limit_divisor: 6,
            },
        }];
        let h = harness(5, config);
        fill(&h.queue, "essim", 3).await;

        let outcome = h.gate.run_once().await.unwrap();
        assert!(matches!(
            outcome,
            AdmissionOutcome::Skipped { threshold: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_message_carries_admitted_state() {
        let h = harness(1, ControlConfig::default());
        h.gate.run_once().await.unwrap();

        let body = &h.queue.bodies("esdl")[0];
        let message = ScenarioMessage::from_body(body).unwrap();
        assert_eq!(message.scenario.state, "admitted");
        assert_eq!(message.scenario.bucket_folder, "runs/1/");
        assert_eq!(message.attempt, 0);
    }

    #[tokio::test]
    async fn test_nothing_free_is_empty_admission() {
        let h = harness(0, ControlConfig::default());
        let outcome = h.gate.run_once().await.unwrap();
        assert_eq!(outcome.admitted(), 0);
        assert!(matches!(outcome, AdmissionOutcome::Admitted { fetched: 0, .. }));
    }
}
