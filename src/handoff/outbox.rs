//! Outbox relay: publishes committed outbox rows to their queues.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::HandoffError;
use crate::queue::MessageQueue;
use crate::store::ScenarioStore;

/// Default number of outbox rows published per pass.
pub const DEFAULT_RELAY_BATCH: usize = 100;

/// Moves pending outbox rows onto their queues.
///
/// A row is marked sent only after its enqueue succeeded. A crash between the
/// two publishes the row again on the next pass.
pub struct OutboxRelay {
    store: Arc<dyn ScenarioStore>,
    queue: Arc<dyn MessageQueue>,
    batch_size: usize,
}

impl OutboxRelay {
    /// Creates a relay with the default batch size.
    pub fn new(store: Arc<dyn ScenarioStore>, queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            store,
            queue,
            batch_size: DEFAULT_RELAY_BATCH,
        }
    }

    /// Sets the number of rows published per pass.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publishes one batch of pending rows. Returns the number published.
    pub async fn drain_once(&self) -> Result<usize, HandoffError> {
        let pending = self.store.pending_outbox(self.batch_size).await?;
        if pending.is_empty() {
            debug!("Outbox empty");
            return Ok(0);
        }

        let mut sent = Vec::with_capacity(pending.len());
        let mut failure = None;
        for record in &pending {
            match self.queue.enqueue(&record.queue, &record.body).await {
                Ok(()) => sent.push(record.id),
                Err(e) => {
                    warn!(outbox_id = record.id, queue = %record.queue, "Outbox publish failed: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        self.store.mark_outbox_sent(&sent).await?;
        if let Some(e) = failure {
            return Err(e.into());
        }

        info!(published = sent.len(), "Outbox relay pass complete");
        Ok(sent.len())
    }
}
