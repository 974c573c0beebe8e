//! Durable, at-least-once message queues.
//!
//! Two capabilities are split into separate traits:
//!
//! - [`MessageQueue`]: producer side plus the depth read used by the
//!   admission gate and the autoscaler.
//! - [`MessageSource`]: consumer side used by stage workers.
//!
//! # Backends
//!
//! - [`RedisQueue`]: Redis lists with one `:processing:{consumer}` list per
//!   receiving worker so that messages held by a crashed worker can be
//!   recovered without touching batches other workers are still processing.
//! - [`MemoryQueue`]: in-process queues with the same semantics.
//!
//! # Leases
//!
//! Every receive renews the [`Consumer`]'s lease for the receive wait plus
//! [`Consumer::lease`]. [`MessageSource::recover_in_flight`] only returns
//! messages of consumers whose lease has lapsed, the list-queue equivalent of
//! a visibility timeout.
//!
//! # Dead letters
//!
//! Every queue `q` has a companion `q:dead_letter` holding JSON entries of the
//! form `{"message": …, "error": …, "moved_at": …}`.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] ::redis::RedisError),

    /// Failed to serialize message data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Name of the dead-letter companion of a queue.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}:dead_letter", queue)
}

/// A receiving worker. In-flight messages are tracked per consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Consumer {
    /// Unique consumer id.
    pub id: String,
    /// How long a received batch stays owned by this consumer.
    pub lease: Duration,
}

impl Consumer {
    /// Creates a consumer named `name` with a unique suffix, so that workers
    /// with the same name in different processes never share in-flight state.
    pub fn new(name: &str, lease: Duration) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", name, &suffix[..8]),
            lease,
        }
    }
}

/// A message received from a queue and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Raw message body.
    pub body: String,
}

impl Delivery {
    /// Wraps a raw body.
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

/// Producer side of a queue backend.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Appends a serialized message to a queue.
    async fn enqueue(&self, queue: &str, body: &str) -> Result<(), QueueError>;

    /// Approximate number of messages waiting in a queue.
    async fn approximate_depth(&self, queue: &str) -> Result<u64, QueueError>;

    /// Parks a message on the queue's dead-letter companion.
    async fn dead_letter(&self, queue: &str, body: &str, error: &str) -> Result<(), QueueError> {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .unwrap_or_else(|_| serde_json::Value::String(body.to_string()));
        let entry = serde_json::json!({
            "message": message,
            "error": error,
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&entry)?;
        self.enqueue(&dead_letter_queue(queue), &serialized).await
    }
}

/// Consumer side of a queue backend.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receives up to `max` messages for `consumer`, waiting at most `wait`
    /// for the first, and renews the consumer's lease.
    ///
    /// Received messages stay in flight until acked or released.
    async fn receive(
        &self,
        queue: &str,
        consumer: &Consumer,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Removes a processed message from the consumer's in-flight set.
    async fn ack(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError>;

    /// Returns an in-flight message to the queue for redelivery.
    async fn release(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError>;

    /// Returns the in-flight messages of consumers whose lease has lapsed.
    /// Returns the count moved.
    async fn recover_in_flight(&self, queue: &str) -> Result<usize, QueueError>;

    /// Called when a consumer stops. Returns anything it still holds to the
    /// queue and drops its lease. Returns the count moved.
    async fn retire(&self, queue: &str, consumer: &Consumer) -> Result<usize, QueueError>;
}
