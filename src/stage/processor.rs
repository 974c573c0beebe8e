//! Generic stage processor.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::fanout::{dedupe_expansions, ExpansionSource};
use super::transform::StageTransform;
use crate::context::PipelineContext;
use crate::error::{HandoffError, StageError, StateError, TransformError};
use crate::handoff::Outgoing;
use crate::metrics::{MessageOutcome, MetricsCollector};
use crate::scenario::{Scenario, ScenarioKey, ScenarioMessage, ScenarioUpdate};

/// A stage's position in the pipeline, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage name.
    pub name: String,
    /// Queue the stage consumes.
    pub queue: String,
    /// State a message must carry to be processed.
    pub input_state: String,
    /// State recorded on success.
    pub output_state: String,
    /// Queue of the next stage, `None` for the terminal stage.
    pub next_queue: Option<String>,
    /// Whether this is the fan-out stage.
    pub fan_out: bool,
}

impl StageSpec {
    /// Resolves stage `name` against the context's pipeline.
    ///
    /// Stage `i` consumes state `order[i + 1]` and records `order[i + 2]`.
    pub fn resolve(ctx: &PipelineContext, name: &str) -> Result<Self, StageError> {
        let pipeline = &ctx.config().pipeline;
        let (idx, stage) = pipeline
            .stage(name)
            .ok_or_else(|| StageError::UnknownStage(name.to_string()))?;

        let states = ctx.states();
        let input_state = states
            .nth(idx + 1)
            .ok_or_else(|| StateError::Unknown(format!("input state of stage {}", name)))?;
        let output_state = states
            .nth(idx + 2)
            .ok_or_else(|| StateError::Unknown(format!("output state of stage {}", name)))?;
        states.check_transition(input_state, output_state)?;

        Ok(Self {
            name: stage.name.clone(),
            queue: stage.queue.clone(),
            input_state: input_state.to_string(),
            output_state: output_state.to_string(),
            next_queue: pipeline.stages.get(idx + 1).map(|s| s.queue.clone()),
            fan_out: stage.fan_out,
        })
    }
}

/// What happened to a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Left at its recorded state for manual reprocessing.
    Parked,
    /// Re-enqueued to the stage queue with a higher attempt count.
    Retried,
    /// Moved to the stage queue's dead-letter companion.
    DeadLettered,
}

/// A message whose transform failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMessage {
    /// Scenario row of the message.
    pub key: ScenarioKey,
    /// Failure description.
    pub error: String,
    /// What was done with the message.
    pub disposition: Disposition,
}

/// Outcome of one processor invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Rows advanced or created by this invocation.
    pub written: Vec<ScenarioKey>,
    /// Messages forwarded to the next queue.
    pub forwarded: usize,
    /// Successful transforms whose row had already moved on.
    pub superseded: Vec<ScenarioKey>,
    /// Messages not in this stage's input state.
    pub skipped: Vec<ScenarioKey>,
    /// Transform failures.
    pub failed: Vec<FailedMessage>,
}

/// Runs a stage transform over a batch of messages and hands off the results.
pub struct StageProcessor {
    ctx: PipelineContext,
    spec: StageSpec,
    transform: Arc<dyn StageTransform>,
    expansion: Option<Arc<dyn ExpansionSource>>,
    metrics: MetricsCollector,
}

impl StageProcessor {
    /// Creates a processor for the configured stage `name`.
    pub fn new(
        ctx: PipelineContext,
        name: &str,
        transform: Arc<dyn StageTransform>,
    ) -> Result<Self, StageError> {
        let spec = StageSpec::resolve(&ctx, name)?;
        Ok(Self {
            ctx,
            spec,
            transform,
            expansion: None,
            metrics: MetricsCollector::new(),
        })
    }

    /// Sets the expansion source of a fan-out stage.
    pub fn with_expansion(mut self, expansion: Arc<dyn ExpansionSource>) -> Self {
        self.expansion = Some(expansion);
        self
    }

    /// The resolved stage position.
    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    /// Processes one batch.
    ///
    /// Transform failures never fail the batch; they are reported in the
    /// result. Store and queue errors abort the invocation.
    pub async fn process(
        &self,
        batch: &[ScenarioMessage],
    ) -> Result<ProcessingResult, StageError> {
        let expansion = match (self.spec.fan_out, &self.expansion) {
            (true, None) => {
                return Err(StageError::MissingExpansion {
                    stage: self.spec.name.clone(),
                })
            }
            (true, Some(source)) => Some(source.as_ref()),
            (false, _) => None,
        };

        let start = Instant::now();
        let mut result = ProcessingResult::default();
        let mut updates = Vec::new();
        let mut outgoing = Vec::new();
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();

        for message in batch {
            let scenario = &message.scenario;
            if scenario.state != self.spec.input_state {
                debug!(
                    stage = %self.spec.name,
                    scenario = %scenario.key(),
                    state = %scenario.state,
                    expected = %self.spec.input_state,
                    "Skipping message not in this stage's input state"
                );
                self.record(MessageOutcome::Skipped);
                result.skipped.push(scenario.key());
                continue;
            }

            let artifacts = match self.transform.apply(scenario).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    failures.push((message, e));
                    continue;
                }
            };

            let mut next = scenario.clone();
            next.state = self.spec.output_state.clone();
            next.artifacts.extend(artifacts);

            let children = match expansion {
                None => Vec::new(),
                Some(source) => match source.expansions(scenario).await {
                    Ok(list) if !list.is_empty() => dedupe_expansions(list),
                    Ok(_) => {
                        let error = TransformError::NoExpansion(scenario.scenario_year);
                        failures.push((message, error));
                        continue;
                    }
                    Err(e) => {
                        failures.push((message, e));
                        continue;
                    }
                },
            };

            updates.push(ScenarioUpdate::advance(next.clone(), scenario.state.clone()));

            if children.is_empty() {
                if let Some(queue) = &self.spec.next_queue {
                    outgoing.push(Outgoing::new(queue, ScenarioMessage::new(next.clone())));
                }
                succeeded.push(next.key());
                continue;
            }

            // Parent row advances, one branch row per expansion key
            succeeded.push(next.key());
            for child in children {
                let mut branch: Scenario = next.clone();
                branch.network_id = Some(child.network_id);
                branch.investment_path = Some(child.investment_path);

                updates.push(ScenarioUpdate::branch(branch.clone(), scenario.state.clone()));
                if let Some(queue) = &self.spec.next_queue {
                    outgoing.push(Outgoing::new(queue, ScenarioMessage::new(branch.clone())));
                }
                succeeded.push(branch.key());
            }
        }

        let report = self.ctx.handoff().commit(&updates, &outgoing).await?;
        for key in succeeded {
            if report.written.contains(&key) {
                self.record(MessageOutcome::Forwarded);
            } else {
                debug!(stage = %self.spec.name, scenario = %key, "Row already moved on, not forwarded");
                self.record(MessageOutcome::Superseded);
                result.superseded.push(key);
            }
        }
        result.written = report.written;
        result.forwarded = report.forwarded;

        for (message, error) in failures {
            let failed = self.dispose(message, error).await?;
            result.failed.push(failed);
        }

        self.metrics
            .record_stage_batch(&self.spec.name, start.elapsed().as_secs_f64());
        info!(
            stage = %self.spec.name,
            batch = batch.len(),
            written = result.written.len(),
            forwarded = result.forwarded,
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Stage batch processed"
        );

        Ok(result)
    }

    /// Applies the retry and dead-letter policy to a failed message.
    async fn dispose(
        &self,
        message: &ScenarioMessage,
        error: TransformError,
    ) -> Result<FailedMessage, StageError> {
        let runtime = &self.ctx.config().stage_runtime;
        let key = message.scenario.key();
        let queue = self.ctx.queue();

        let disposition = if message.attempt + 1 < runtime.max_attempts {
            let retry = message.retried();
            warn!(
                stage = %self.spec.name,
                scenario = %key,
                attempt = retry.attempt,
                "Transform failed, retrying: {}",
                error
            );
            let body = retry.to_body().map_err(HandoffError::from)?;
            queue.enqueue(&self.spec.queue, &body).await?;
            Disposition::Retried
        } else if runtime.dead_letter {
            error!(
                stage = %self.spec.name,
                scenario = %key,
                "Transform failed, moving to dead letter queue: {}",
                error
            );
            let body = message.to_body().map_err(HandoffError::from)?;
            queue
                .dead_letter(&self.spec.queue, &body, &error.to_string())
                .await?;
            self.metrics.record_dead_letter(&self.spec.queue);
            Disposition::DeadLettered
        } else {
            error!(
                stage = %self.spec.name,
                scenario = %key,
                "Transform failed, scenario parked at {}: {}",
                message.scenario.state,
                error
            );
            Disposition::Parked
        };

        self.record(match disposition {
            Disposition::Parked => MessageOutcome::Failed,
            Disposition::Retried => MessageOutcome::Retried,
            Disposition::DeadLettered => MessageOutcome::DeadLettered,
        });

        Ok(FailedMessage {
            key,
            error: error.to_string(),
            disposition,
        })
    }

    fn record(&self, outcome: MessageOutcome) {
        self.metrics.record_stage_outcome(&self.spec.name, outcome);
    }
}
