//! Scheduled control loop.
//!
//! Ticks the admission gate, the fleet autoscaler and (in outbox mode) the
//! outbox relay on their configured intervals. Every interval fires once
//! immediately. A failed tick is logged and retried on the next interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::admission::{AdmissionGate, AdmissionOutcome};
use crate::autoscaler::FleetAutoscaler;
use crate::context::PipelineContext;
use crate::fleet::FleetController;
use crate::handoff::{HandoffMode, OutboxRelay};

/// Counters of one control loop run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlStats {
    /// Admission ticks run.
    pub admission_ticks: u64,
    /// Scenarios admitted across ticks.
    pub admitted: u64,
    /// Autoscaler ticks run.
    pub autoscale_ticks: u64,
    /// Tasks started across ticks.
    pub tasks_started: u64,
    /// Outbox rows published across ticks.
    pub relayed: u64,
    /// Ticks that ended in an error.
    pub errors: u64,
}

/// Runs the scheduled components of the control plane.
pub struct ControlLoop {
    ctx: PipelineContext,
    gate: AdmissionGate,
    autoscaler: Option<FleetAutoscaler>,
    relay: Option<OutboxRelay>,
}

impl ControlLoop {
    /// Creates a loop with admission, plus the outbox relay in outbox mode.
    pub fn new(ctx: PipelineContext) -> Self {
        let relay = (ctx.config().handoff_mode == HandoffMode::Outbox).then(|| {
            OutboxRelay::new(ctx.store(), ctx.queue())
                .with_batch_size(ctx.config().schedule.outbox_batch)
        });

        Self {
            gate: AdmissionGate::new(ctx.clone()),
            autoscaler: None,
            relay,
            ctx,
        }
    }

    /// Enables autoscaling against a fleet backend.
    pub fn with_autoscaler(mut self, fleet: Arc<dyn FleetController>) -> Self {
        self.autoscaler = Some(FleetAutoscaler::new(self.ctx.clone(), fleet));
        self
    }

    /// Runs until `shutdown` completes. Returns the accumulated counters.
    pub async fn run_until<F>(&self, shutdown: F) -> ControlStats
    where
        F: Future<Output = ()>,
    {
        let schedule = &self.ctx.config().schedule;
        let mut admission = ticker(schedule.admission_interval_secs);
        let mut autoscale = ticker(schedule.autoscale_interval_secs);
        let mut outbox = ticker(schedule.outbox_interval_secs);
        let mut stats = ControlStats::default();

        info!(
            autoscaler = self.autoscaler.is_some(),
            relay = self.relay.is_some(),
            "Control loop started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = admission.tick() => {
                    stats.admission_ticks += 1;
                    match self.gate.run_once().await {
                        Ok(AdmissionOutcome::Admitted { admitted, .. }) => {
                            stats.admitted += admitted as u64;
                        }
                        Ok(AdmissionOutcome::Skipped { .. }) => {}
                        Err(e) => {
                            stats.errors += 1;
                            error!(error = %e, "Admission tick failed");
                        }
                    }
                }
                _ = autoscale.tick(), if self.autoscaler.is_some() => {
                    if let Some(autoscaler) = &self.autoscaler {
                        stats.autoscale_ticks += 1;
                        let report = autoscaler.run_once().await;
                        stats.tasks_started += report.started() as u64;
                        stats.errors += report.failed() as u64;
                    }
                }
                _ = outbox.tick(), if self.relay.is_some() => {
                    if let Some(relay) = &self.relay {
                        match relay.drain_once().await {
                            Ok(published) => stats.relayed += published as u64,
                            Err(e) => {
                                stats.errors += 1;
                                warn!(error = %e, "Outbox relay tick failed");
                            }
                        }
                    }
                }
            }
        }

        info!(?stats, "Control loop stopped");
        stats
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
