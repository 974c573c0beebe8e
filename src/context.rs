//! Process-wide pipeline context.
//!
//! Built once at startup from a validated [`ControlConfig`] and handed to
//! every component. Nothing in it changes after construction.

use std::sync::Arc;

use crate::config::{ConfigError, ControlConfig};
use crate::handoff::Handoff;
use crate::queue::{MessageQueue, MessageSource, QueueError, RedisQueue};
use crate::scenario::StateOrder;
use crate::store::{PgScenarioStore, ScenarioStore, StoreError};

/// Errors raised while building a context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Shared, read-only handles for one process.
#[derive(Clone)]
pub struct PipelineContext {
    config: Arc<ControlConfig>,
    states: Arc<StateOrder>,
    store: Arc<dyn ScenarioStore>,
    queue: Arc<dyn MessageQueue>,
    source: Arc<dyn MessageSource>,
}

impl PipelineContext {
    /// Builds a context from a config and backends.
    ///
    /// The config is validated here so that every holder of a context can
    /// rely on its invariants.
    pub fn new(
        config: ControlConfig,
        store: Arc<dyn ScenarioStore>,
        queue: Arc<dyn MessageQueue>,
        source: Arc<dyn MessageSource>,
    ) -> Result<Self, ContextError> {
        config.validate()?;
        let states = config
            .pipeline
            .state_order()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            states: Arc::new(states),
            store,
            queue,
            source,
        })
    }

    /// Connects to PostgreSQL and Redis using the configured URLs.
    pub async fn connect(config: ControlConfig) -> Result<Self, ContextError> {
        let store = Arc::new(PgScenarioStore::connect(&config.database_url).await?);
        let redis = Arc::new(RedisQueue::connect(&config.redis_url, &config.queue_prefix).await?);
        Self::new(config, store, redis.clone(), redis)
    }

    /// The configuration.
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// The configured state order.
    pub fn states(&self) -> &StateOrder {
        &self.states
    }

    /// The scenario store.
    pub fn store(&self) -> Arc<dyn ScenarioStore> {
        Arc::clone(&self.store)
    }

    /// The producer side of the queue backend.
    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        Arc::clone(&self.queue)
    }

    /// The consumer side of the queue backend.
    pub fn source(&self) -> Arc<dyn MessageSource> {
        Arc::clone(&self.source)
    }

    /// A hand-off using the configured mode.
    pub fn handoff(&self) -> Handoff {
        Handoff::new(self.store(), self.queue(), self.config.handoff_mode)
    }
}
