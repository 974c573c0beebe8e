//! Fleet autoscaler: sizes each worker pool to its queue backlog.
//!
//! Per (queue, family) pool and pass:
//!
//! ```text
//! q = depth(queue)          r = running(family)        L = container_limit
//!
//! r > L                      → no action (never scales down)
//! add = min(q / damping, L - r)
//! add == 0 ∧ r == 0 ∧ q > 0  → add = 1 (cold start)
//! add  > 0                   → start in calls of ≤ batch_limit
//! ```
//!
//! Pools are independent: a failure in one is logged and never affects the
//! others.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::PoolSettings;
use crate::context::PipelineContext;
use crate::fleet::FleetController;
use crate::metrics::MetricsCollector;

/// Decision made for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingDecision {
    /// No action needed.
    None { reason: String },
    /// Start more tasks.
    ScaleUp { count: u64, reason: String },
}

impl ScalingDecision {
    /// Tasks to start; zero for [`ScalingDecision::None`].
    pub fn count(&self) -> u64 {
        match self {
            ScalingDecision::None { .. } => 0,
            ScalingDecision::ScaleUp { count, .. } => *count,
        }
    }
}

/// Computes how many tasks to add to a pool.
///
/// The result never takes the pool above `limit`, including the cold-start
/// case.
pub fn plan_scale(queue_length: u64, running: u64, limit: u64, damping: u64) -> ScalingDecision {
    if running > limit {
        return ScalingDecision::None {
            reason: format!("{} running exceeds limit {}", running, limit),
        };
    }

    let delta = queue_length / damping.max(1);
    let headroom = limit - running;
    let count = delta.min(headroom);

    if count > 0 {
        return ScalingDecision::ScaleUp {
            count,
            reason: format!(
                "backlog {} over {} running (limit {})",
                queue_length, running, limit
            ),
        };
    }

    if running == 0 && queue_length > 0 && limit > 0 {
        return ScalingDecision::ScaleUp {
            count: 1,
            reason: format!("cold start with backlog {}", queue_length),
        };
    }

    let reason = if running == limit && queue_length > 0 {
        format!("limit {} reached", limit)
    } else {
        format!("backlog {} needs no new tasks", queue_length)
    };
    ScalingDecision::None { reason }
}

/// Splits `count` into backend calls of at most `limit` tasks.
pub fn split_batches(count: u64, limit: usize) -> Vec<usize> {
    let limit = limit.max(1) as u64;
    let full = count / limit;
    let remainder = count % limit;

    let mut batches = vec![limit as usize; full as usize];
    if remainder > 0 {
        batches.push(remainder as usize);
    }
    batches
}

/// Outcome of one pool in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Pool family.
    pub family: String,
    /// Queue driving the pool.
    pub queue: String,
    /// Observed queue length, `None` if the depth read failed.
    pub queue_length: Option<u64>,
    /// Running tasks, `None` if the listing failed.
    pub running: Option<u64>,
    /// Decision taken, `None` if the pool was not evaluated.
    pub decision: Option<ScalingDecision>,
    /// Tasks the backend accepted.
    pub started: usize,
    /// First error hit for this pool.
    pub error: Option<String>,
}

impl PoolOutcome {
    fn new(pool: &PoolSettings) -> Self {
        Self {
            family: pool.family.clone(),
            queue: pool.queue.clone(),
            queue_length: None,
            running: None,
            decision: None,
            started: 0,
            error: None,
        }
    }
}

/// Outcome of one autoscaler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoscaleReport {
    /// One entry per configured pool, in configuration order.
    pub pools: Vec<PoolOutcome>,
}

impl AutoscaleReport {
    /// Total tasks started across pools.
    pub fn started(&self) -> usize {
        self.pools.iter().map(|p| p.started).sum()
    }

    /// Pools that hit an error.
    pub fn failed(&self) -> usize {
        self.pools.iter().filter(|p| p.error.is_some()).count()
    }
}

/// The fleet autoscaler.
pub struct FleetAutoscaler {
    ctx: PipelineContext,
    fleet: Arc<dyn FleetController>,
    metrics: MetricsCollector,
}

impl FleetAutoscaler {
    /// Creates an autoscaler over a context and a fleet backend.
    pub fn new(ctx: PipelineContext, fleet: Arc<dyn FleetController>) -> Self {
        Self {
            ctx,
            fleet,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one pass over every configured pool. Pools are scaled
    /// concurrently; calls within a pool are sequential.
    pub async fn run_once(&self) -> AutoscaleReport {
        let pools = &self.ctx.config().fleet.pools;
        let outcomes = join_all(pools.iter().map(|pool| self.scale_pool(pool))).await;

        for outcome in &outcomes {
            if let Some(e) = &outcome.error {
                self.metrics.record_fleet_error(&outcome.family);
                error!(
                    family = %outcome.family,
                    queue = %outcome.queue,
                    "Autoscaling failed: {}",
                    e
                );
            }
        }
        let report = AutoscaleReport { pools: outcomes };

        info!(
            pools = report.pools.len(),
            started = report.started(),
            failed = report.failed(),
            "Autoscaler pass complete"
        );
        report
    }

    async fn scale_pool(&self, pool: &PoolSettings) -> PoolOutcome {
        let fleet_settings = &self.ctx.config().fleet;
        let mut outcome = PoolOutcome::new(pool);

        let queue_length = match self.ctx.queue().approximate_depth(&pool.queue).await {
            Ok(depth) => depth,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.queue_length = Some(queue_length);
        self.metrics.update_queue_depth(&pool.queue, queue_length);

        let running = match self
            .fleet
            .count_running(&fleet_settings.cluster, &pool.family)
            .await
        {
            Ok(running) => running,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.running = Some(running);
        self.metrics.update_running_tasks(&pool.family, running);

        let decision = plan_scale(
            queue_length,
            running,
            pool.container_limit,
            fleet_settings.damping_divisor,
        );
        let count = decision.count();
        match &decision {
            ScalingDecision::None { reason } => {
                debug!(family = %pool.family, queue_length, running, "No scaling: {}", reason);
            }
            ScalingDecision::ScaleUp { count, reason } => {
                info!(family = %pool.family, queue_length, running, count, "Scaling up: {}", reason);
            }
        }
        outcome.decision = Some(decision);

        let policy = fleet_settings.network_policies.lookup(&pool.family);
        for batch in split_batches(count, fleet_settings.batch_limit) {
            match self
                .fleet
                .start_tasks(
                    &fleet_settings.cluster,
                    &pool.family,
                    &pool.task_definition,
                    batch,
                    policy,
                )
                .await
            {
                Ok(accepted) => {
                    outcome.started += accepted;
                    self.metrics.record_tasks_started(&pool.family, accepted);
                    if accepted < batch {
                        warn!(
                            family = %pool.family,
                            requested = batch,
                            accepted,
                            "Backend accepted fewer tasks than requested"
                        );
                    }
                }
                Err(e) => {
                    // Remaining batches for this pool wait for the next pass
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }

        outcome
    }
}
