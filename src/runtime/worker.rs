//! Long-running stage workers.
//!
//! A [`StageWorkerGroup`] runs a fixed number of [`StageWorker`]s against one
//! stage queue. Each worker repeatedly:
//!
//! 1. Receives up to `max_batch` messages (they stay in flight).
//! 2. Dead-letters and acks bodies that do not parse.
//! 3. Runs the stage processor under `processing_timeout`.
//! 4. Acks the batch on success, releases it for redelivery otherwise.
//!
//! Every worker is its own queue [`Consumer`], leased for the processing
//! timeout plus one poll interval. Messages left in flight by a crashed worker
//! are recovered when a group starts, once that worker's lease has lapsed;
//! batches of live workers elsewhere in the fleet are left alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StageRuntimeSettings;
use crate::context::PipelineContext;
use crate::error::StageError;
use crate::metrics::{MessageOutcome, MetricsCollector};
use crate::queue::{Consumer, Delivery, MessageQueue, MessageSource};
use crate::scenario::ScenarioMessage;
use crate::stage::{ProcessingResult, StageProcessor};

/// Errors raised by a worker group.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Group is already running.
    #[error("Worker group is already running")]
    AlreadyRunning,

    /// Group is not running.
    #[error("Worker group is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Outcome of one receive-and-process cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Messages received.
    pub received: usize,
    /// Bodies that failed to parse.
    pub malformed: usize,
    /// Processor result, `None` when nothing parseable was received.
    pub result: Option<ProcessingResult>,
}

/// A single worker bound to one stage.
pub struct StageWorker {
    consumer: Consumer,
    processor: Arc<StageProcessor>,
    source: Arc<dyn MessageSource>,
    queue: Arc<dyn MessageQueue>,
    settings: StageRuntimeSettings,
    metrics: MetricsCollector,
}

impl StageWorker {
    /// Creates a worker for `processor`. `name` is made unique per worker.
    pub fn new(name: &str, ctx: &PipelineContext, processor: Arc<StageProcessor>) -> Self {
        let settings = ctx.config().stage_runtime.clone();
        let lease = settings.processing_timeout() + settings.poll_interval();
        Self {
            consumer: Consumer::new(name, lease),
            processor,
            source: ctx.source(),
            queue: ctx.queue(),
            settings,
            metrics: MetricsCollector::new(),
        }
    }

    /// Queue consumer identity of this worker.
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    fn stage_queue(&self) -> &str {
        &self.processor.spec().queue
    }

    /// Receives and processes one batch.
    ///
    /// On a processor error or timeout the parsed messages are released for
    /// redelivery and the error is returned.
    pub async fn poll_once(&self) -> Result<PollOutcome, StageError> {
        let queue = self.stage_queue().to_string();
        let deliveries = self
            .source
            .receive(
                &queue,
                &self.consumer,
                self.settings.max_batch,
                self.settings.poll_interval(),
            )
            .await?;

        let mut outcome = PollOutcome {
            received: deliveries.len(),
            ..Default::default()
        };
        if deliveries.is_empty() {
            return Ok(outcome);
        }

        let mut parsed: Vec<(Delivery, ScenarioMessage)> = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match ScenarioMessage::from_body(&delivery.body) {
                Ok(message) => parsed.push((delivery, message)),
                Err(e) => {
                    warn!(
                        worker_id = %self.consumer.id,
                        queue = %queue,
                        "Malformed message: {}",
                        e
                    );
                    self.queue
                        .dead_letter(&queue, &delivery.body, &format!("malformed message: {}", e))
                        .await?;
                    self.source.ack(&queue, &self.consumer, &delivery).await?;
                    self.metrics.record_dead_letter(&queue);
                    self.metrics.record_stage_outcome(
                        &self.processor.spec().name,
                        MessageOutcome::DeadLettered,
                    );
                    outcome.malformed += 1;
                }
            }
        }

        if parsed.is_empty() {
            return Ok(outcome);
        }

        let messages: Vec<ScenarioMessage> = parsed.iter().map(|(_, m)| m.clone()).collect();
        let timeout = self.settings.processing_timeout();
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, self.processor.process(&messages)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(timeout)),
        };

        match result {
            Ok(result) => {
                for (delivery, _) in &parsed {
                    self.source.ack(&queue, &self.consumer, delivery).await?;
                }
                debug!(
                    worker_id = %self.consumer.id,
                    batch = parsed.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Batch acknowledged"
                );
                outcome.result = Some(result);
                Ok(outcome)
            }
            Err(e) => {
                for (delivery, _) in &parsed {
                    if let Err(release_err) =
                        self.source.release(&queue, &self.consumer, delivery).await
                    {
                        error!(
                            worker_id = %self.consumer.id,
                            error = %release_err,
                            "Failed to release message"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Main worker loop. Runs until a shutdown signal is received.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.consumer.id, queue = %self.stage_queue(), "Worker started");
        self.metrics.inc_workers();

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.consumer.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.poll_once().await {
                Ok(outcome) if outcome.received == 0 => {
                    // The receive already waited up to poll_interval
                    debug!(worker_id = %self.consumer.id, "No messages available");
                    tokio::task::yield_now().await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        worker_id = %self.consumer.id,
                        error = %e,
                        "Batch failed, messages released"
                    );
                    tokio::time::sleep(self.settings.poll_interval()).await;
                }
            }
        }

        match self.source.retire(self.stage_queue(), &self.consumer).await {
            Ok(0) => {}
            Ok(returned) => {
                info!(worker_id = %self.consumer.id, returned, "Returned held messages")
            }
            Err(e) => {
                warn!(worker_id = %self.consumer.id, error = %e, "Failed to retire consumer")
            }
        }

        self.metrics.dec_workers();
        info!(worker_id = %self.consumer.id, "Worker stopped");
    }
}

/// A group of workers consuming one stage queue.
pub struct StageWorkerGroup {
    ctx: PipelineContext,
    processor: Arc<StageProcessor>,
    num_workers: usize,
    shutdown_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    is_running: AtomicBool,
}

impl StageWorkerGroup {
    /// Creates a group of `num_workers` workers.
    pub fn new(ctx: PipelineContext, processor: StageProcessor, num_workers: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx,
            processor: Arc::new(processor),
            num_workers: num_workers.max(1),
            shutdown_timeout: Duration::from_secs(60),
            shutdown_tx,
            handles: Vec::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Sets how long shutdown waits for in-progress batches.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Recovers messages held under lapsed leases and spawns the workers.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning);
        }

        let queue = self.processor.spec().queue.clone();
        match self.ctx.source().recover_in_flight(&queue).await {
            Ok(0) => {}
            Ok(recovered) => {
                info!(recovered, queue = %queue, "Recovered messages from lapsed leases")
            }
            Err(e) => warn!(error = %e, queue = %queue, "Failed to recover in-flight messages"),
        }

        for i in 0..self.num_workers {
            let worker = StageWorker::new(
                &format!("{}-{}", self.processor.spec().name, i),
                &self.ctx,
                Arc::clone(&self.processor),
            );
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.handles
                .push(tokio::spawn(async move { worker.run(shutdown_rx).await }));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            stage = %self.processor.spec().name,
            num_workers = self.num_workers,
            "Stage workers started"
        );
        Ok(())
    }

    /// Signals every worker and waits for in-progress batches to finish.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(WorkerError::NotRunning);
        }

        // Workers may already have stopped
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut self.handles);
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.shutdown_timeout, wait_all).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Stage workers stopped");
                Ok(())
            }
            Err(_) => Err(WorkerError::ShutdownTimeout(self.shutdown_timeout)),
        }
    }

    /// Whether the workers are running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::ControlConfig;
    use crate::error::TransformError;
    use crate::queue::{dead_letter_queue, MemoryQueue};
    use crate::scenario::{ArtifactRefs, Scenario, ScenarioKey};
    use crate::stage::{PassthroughTransform, StageTransform};
    use crate::store::MemoryStore;

    struct Slow;

    #[async_trait]
    impl StageTransform for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn apply(&self, _scenario: &Scenario) -> Result<ArtifactRefs, TransformError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ArtifactRefs::new())
        }
    }

    fn setup(
        config: ControlConfig,
        transform: Arc<dyn StageTransform>,
    ) -> (StageWorker, Arc<MemoryStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryStore::with_scenarios([Scenario::new(1, "admitted", "runs/1/")]));
        let queue = Arc::new(MemoryQueue::new());
        let ctx = PipelineContext::new(config, store.clone(), queue.clone(), queue.clone()).unwrap();
        let processor = StageProcessor::new(ctx.clone(), "esdl_updater", transform).unwrap();
        let worker = StageWorker::new("w-0", &ctx, Arc::new(processor));
        (worker, store, queue)
    }

    async fn enqueue_admitted(queue: &MemoryQueue) {
        let body = ScenarioMessage::new(Scenario::new(1, "admitted", "runs/1/"))
            .to_body()
            .unwrap();
        queue.enqueue("esdl", &body).await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_processes_and_acks() {
        let (worker, store, queue) = setup(ControlConfig::default(), Arc::new(PassthroughTransform));
        enqueue_admitted(&queue).await;

        let outcome = worker.poll_once().await.unwrap();

        assert_eq!(outcome.received, 1);
        assert_eq!(outcome.result.unwrap().forwarded, 1);
        assert!(queue.in_flight("esdl").is_empty());
        assert_eq!(queue.bodies("essim").len(), 1);
        assert_eq!(
            store.state_of(&ScenarioKey::root(1)).as_deref(),
            Some("esdlUpdated")
        );
    }

    #[tokio::test]
    async fn test_malformed_body_dead_lettered() {
        let (worker, _, queue) = setup(ControlConfig::default(), Arc::new(PassthroughTransform));
        queue.enqueue("esdl", "not json").await.unwrap();

        let outcome = worker.poll_once().await.unwrap();

        assert_eq!(outcome.malformed, 1);
        assert!(outcome.result.is_none());
        assert!(queue.in_flight("esdl").is_empty());
        let dead = queue.bodies(&dead_letter_queue("esdl"));
        assert_eq!(dead.len(), 1);
        assert!(dead[0].contains("malformed message"));
    }

    #[tokio::test]
    async fn test_timeout_releases_batch() {
        let mut config = ControlConfig::default();
        config.stage_runtime.processing_timeout_secs = 1;
        let (worker, store, queue) = setup(config, Arc::new(Slow));
        enqueue_admitted(&queue).await;

        let result = worker.poll_once().await;

        assert!(matches!(result, Err(StageError::Timeout(_))));
        assert_eq!(queue.bodies("esdl").len(), 1);
        assert!(queue.in_flight("esdl").is_empty());
        assert_eq!(
            store.state_of(&ScenarioKey::root(1)).as_deref(),
            Some("admitted")
        );
    }

    #[tokio::test]
    async fn test_empty_queue_polls_nothing() {
        let (worker, _, _) = setup(ControlConfig::default(), Arc::new(PassthroughTransform));
        assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::default());
    }

    #[tokio::test]
    async fn test_group_start_leaves_live_batches_alone() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ctx = PipelineContext::new(
            ControlConfig::default(),
            store,
            queue.clone(),
            queue.clone(),
        )
        .unwrap();

        // Another worker in the fleet is mid-batch
        let busy = Consumer::new("esdl_updater-0", Duration::from_secs(3600));
        queue.enqueue("esdl", "in-progress").await.unwrap();
        queue
            .receive("esdl", &busy, 1, Duration::ZERO)
            .await
            .unwrap();

        let processor =
            StageProcessor::new(ctx.clone(), "esdl_updater", Arc::new(PassthroughTransform))
                .unwrap();
        let mut group = StageWorkerGroup::new(ctx, processor, 1)
            .with_shutdown_timeout(Duration::from_secs(5));
        group.start().await.unwrap();
        group.shutdown().await.unwrap();

        assert!(queue.bodies("esdl").is_empty());
        assert_eq!(queue.in_flight("esdl"), vec!["in-progress".to_string()]);
    }

    #[tokio::test]
    async fn test_workers_get_distinct_consumers() {
        let (a, _, _) = setup(ControlConfig::default(), Arc::new(PassthroughTransform));
        let (b, _, _) = setup(ControlConfig::default(), Arc::new(PassthroughTransform));
        assert_ne!(a.consumer().id, b.consumer().id);
        assert_eq!(a.consumer().lease, Duration::from_secs(900 + 5));
    }

    #[tokio::test]
    async fn test_group_recovers_in_flight_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ctx = PipelineContext::new(
            ControlConfig::default(),
            store,
            queue.clone(),
            queue.clone(),
        )
        .unwrap();
        queue.enqueue("esdl", "stuck").await.unwrap();
        let crashed = Consumer::new("crashed", Duration::ZERO);
        queue
            .receive("esdl", &crashed, 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(queue.in_flight("esdl").len(), 1);

        let processor =
            StageProcessor::new(ctx.clone(), "esdl_updater", Arc::new(PassthroughTransform))
                .unwrap();
        let mut group = StageWorkerGroup::new(ctx, processor, 2)
            .with_shutdown_timeout(Duration::from_secs(5));

        group.start().await.unwrap();
        assert!(group.is_running());
        assert!(matches!(group.start().await, Err(WorkerError::AlreadyRunning)));

        group.shutdown().await.unwrap();
        assert!(!group.is_running());
        assert!(queue.in_flight("esdl").is_empty());
    }
}
