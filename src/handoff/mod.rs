//! Hand-off of scenarios from the store to the next queue.
//!
//! Every component that moves a scenario forward (the admission gate and each
//! stage processor) commits a batch of [`ScenarioUpdate`]s and then forwards
//! one message per advanced row. Two modes are supported:
//!
//! ```text
//! update_then_enqueue:  store.bulk_update ──commit──▶ queue.enqueue × n
//!                       (crash in between: state advanced, message lost)
//!
//! outbox:               store.bulk_update + outbox rows ──commit──▶ (relay) queue.enqueue
//!                       (relay crash: message published twice, never lost)
//! ```
//!
//! In both modes only rows the store reports as written are forwarded, so a
//! replayed or concurrent batch never produces duplicate downstream work.

pub mod outbox;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HandoffError;
use crate::queue::MessageQueue;
use crate::scenario::{ScenarioKey, ScenarioMessage, ScenarioUpdate};
use crate::store::{OutboxEntry, ScenarioStore};

pub use outbox::OutboxRelay;

/// How updates and outgoing messages are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// Commit the store update, then enqueue directly.
    #[default]
    UpdateThenEnqueue,
    /// Write messages to an outbox table in the update transaction.
    Outbox,
}

impl fmt::Display for HandoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffMode::UpdateThenEnqueue => write!(f, "update_then_enqueue"),
            HandoffMode::Outbox => write!(f, "outbox"),
        }
    }
}

impl FromStr for HandoffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "update_then_enqueue" => Ok(HandoffMode::UpdateThenEnqueue),
            "outbox" => Ok(HandoffMode::Outbox),
            other => Err(format!("unknown handoff mode '{}'", other)),
        }
    }
}

/// A message bound for a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    /// Destination queue.
    pub queue: String,
    /// Message to send.
    pub message: ScenarioMessage,
}

impl Outgoing {
    /// Creates an outgoing message.
    pub fn new(queue: impl Into<String>, message: ScenarioMessage) -> Self {
        Self {
            queue: queue.into(),
            message,
        }
    }

    fn key(&self) -> ScenarioKey {
        self.message.scenario.key()
    }
}

/// Outcome of a hand-off commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffReport {
    /// Rows the store reported as written.
    pub written: Vec<ScenarioKey>,
    /// Messages enqueued or staged in the outbox.
    pub forwarded: usize,
}

/// Commits scenario updates and forwards their messages.
#[derive(Clone)]
pub struct Handoff {
    store: Arc<dyn ScenarioStore>,
    queue: Arc<dyn MessageQueue>,
    mode: HandoffMode,
}

impl Handoff {
    /// Creates a hand-off over a store and queue backend.
    pub fn new(
        store: Arc<dyn ScenarioStore>,
        queue: Arc<dyn MessageQueue>,
        mode: HandoffMode,
    ) -> Self {
        Self { store, queue, mode }
    }

    /// The configured mode.
    pub fn mode(&self) -> HandoffMode {
        self.mode
    }

    /// Commits `updates` and forwards every outgoing message whose row was
    /// written. A row never forwards more than one message.
    pub async fn commit(
        &self,
        updates: &[ScenarioUpdate],
        outgoing: &[Outgoing],
    ) -> Result<HandoffReport, HandoffError> {
        if updates.is_empty() {
            return Ok(HandoffReport::default());
        }

        // Serialize first so nothing is written for an unsendable batch
        let mut bodies = Vec::with_capacity(outgoing.len());
        for out in outgoing {
            bodies.push((out.key(), out.queue.as_str(), out.message.to_body()?));
        }

        match self.mode {
            HandoffMode::UpdateThenEnqueue => {
                let written = self.store.bulk_update_state(updates).await?;
                let mut pending: HashSet<&ScenarioKey> = written.iter().collect();

                let mut forwarded = 0;
                for (key, queue, body) in &bodies {
                    if !pending.remove(key) {
                        debug!(scenario = %key, "Row not written, message not forwarded");
                        continue;
                    }
                    if let Err(e) = self.queue.enqueue(queue, body).await {
                        warn!(
                            scenario = %key,
                            queue = %queue,
                            forwarded,
                            "Enqueue failed after state update: {}",
                            e
                        );
                        return Err(e.into());
                    }
                    forwarded += 1;
                }

                Ok(HandoffReport { written, forwarded })
            }
            HandoffMode::Outbox => {
                let mut seen = HashSet::new();
                let entries: Vec<OutboxEntry> = bodies
                    .into_iter()
                    .filter(|(key, _, _)| seen.insert(key.clone()))
                    .map(|(key, queue, body)| OutboxEntry {
                        key,
                        queue: queue.to_string(),
                        body,
                    })
                    .collect();

                let written = self.store.bulk_update_with_outbox(updates, &entries).await?;
                let forwarded = entries.iter().filter(|e| written.contains(&e.key)).count();

                Ok(HandoffReport { written, forwarded })
            }
        }
    }
}
