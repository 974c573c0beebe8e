//! Redis-backed queues with reliable receive.
//!
//! Each logical queue `q` maps to these Redis keys:
//!
//! - `{prefix}{q}`: messages waiting for a worker (LPUSH in, RPOP out, FIFO)
//! - `{prefix}{q}:processing:{consumer}`: messages handed to one worker and
//!   not yet acked
//! - `{prefix}{q}:lease:{consumer}`: present while the worker's lease holds
//!
//! Receive uses BRPOPLPUSH / RPOPLPUSH so that a message is never only in the
//! worker's memory. A worker that dies mid-batch leaves its messages in its
//! processing list and lets its lease expire; [`MessageSource::recover_in_flight`]
//! puts them back. Workers that are alive keep their batches.
//!
//! The blocking pop runs on a connection owned by the receiving consumer. The
//! shared [`ConnectionManager`] multiplexes every other command and is never
//! blocked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tracing::debug;

use super::{Consumer, Delivery, MessageQueue, MessageSource, QueueError};

/// Key layout under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    fn queue(&self, queue: &str) -> String {
        format!("{}{}", self.prefix, queue)
    }

    fn processing_prefix(&self, queue: &str) -> String {
        format!("{}{}:processing:", self.prefix, queue)
    }

    fn processing(&self, queue: &str, consumer: &str) -> String {
        format!("{}{}", self.processing_prefix(queue), consumer)
    }

    fn lease(&self, queue: &str, consumer: &str) -> String {
        format!("{}{}:lease:{}", self.prefix, queue, consumer)
    }

    /// Consumer owning a processing list, `None` for other keys.
    fn consumer_of<'a>(&self, queue: &str, processing: &'a str) -> Option<&'a str> {
        processing
            .strip_prefix(&self.processing_prefix(queue))
            .filter(|consumer| !consumer.is_empty())
    }
}

/// Redis list queue backend.
#[derive(Clone)]
pub struct RedisQueue {
    /// Client used to open per-consumer blocking connections.
    client: redis::Client,
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// One connection per receiving consumer, used only for BRPOPLPUSH.
    blocking: Arc<Mutex<HashMap<String, MultiplexedConnection>>>,
    /// Keys under the configured prefix.
    keys: QueueKeys,
}

impl RedisQueue {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Key prefix for all queues (e.g., "gridflow:")
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            redis,
            blocking: Arc::new(Mutex::new(HashMap::new())),
            keys: QueueKeys {
                prefix: prefix.to_string(),
            },
        })
    }

    fn blocking_connections(&self) -> MutexGuard<'_, HashMap<String, MultiplexedConnection>> {
        self.blocking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn blocking_connection(
        &self,
        consumer: &str,
    ) -> Result<MultiplexedConnection, QueueError> {
        let cached = self.blocking_connections().get(consumer).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        self.blocking_connections()
            .insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// Number of messages currently held by one consumer.
    pub async fn in_flight_len(&self, queue: &str, consumer: &Consumer) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(self.keys.processing(queue, &consumer.id)).await?;
        Ok(len)
    }

    /// Processing lists of every consumer that has held messages of `queue`.
    async fn processing_lists(&self, queue: &str) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", self.keys.processing_prefix(queue));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Moves everything in one processing list back to the queue.
    async fn requeue_list(&self, queue: &str, processing: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let key = self.keys.queue(queue);
        let mut moved = 0;
        while conn
            .rpoplpush::<_, _, Option<String>>(processing, &key)
            .await?
            .is_some()
        {
            moved += 1;
        }
        Ok(moved)
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn enqueue(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(self.keys.queue(queue), body).await?;
        Ok(())
    }

    async fn approximate_depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(self.keys.queue(queue)).await?;
        Ok(len)
    }
}

#[async_trait]
impl MessageSource for RedisQueue {
    async fn receive(
        &self,
        queue: &str,
        consumer: &Consumer,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let key = self.keys.queue(queue);
        let processing = self.keys.processing(queue, &consumer.id);
        let timeout_secs = wait.as_secs().max(1);
        let mut conn = self.redis.clone();

        // The lease covers the blocking wait plus the time to process the batch
        let lease = Duration::from_secs(timeout_secs) + consumer.lease;
        redis::cmd("SET")
            .arg(self.keys.lease(queue, &consumer.id))
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async::<_, ()>(&mut conn)
            .await?;

        // Block only for the first message, then drain without waiting
        let mut blocking = self.blocking_connection(&consumer.id).await?;
        let first: Option<String> = match redis::cmd("BRPOPLPUSH")
            .arg(&key)
            .arg(&processing)
            .arg(timeout_secs)
            .query_async(&mut blocking)
            .await
        {
            Ok(first) => first,
            Err(e) => {
                // Reconnect on the next receive
                self.blocking_connections().remove(&consumer.id);
                return Err(e.into());
            }
        };

        let Some(first) = first else {
            return Ok(Vec::new());
        };

        let mut deliveries = vec![Delivery::new(first)];
        while deliveries.len() < max {
            let next: Option<String> = conn.rpoplpush(&key, &processing).await?;
            match next {
                Some(body) => deliveries.push(Delivery::new(body)),
                None => break,
            }
        }

        Ok(deliveries)
    }

    async fn ack(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lrem::<_, _, ()>(self.keys.processing(queue, &consumer.id), 1, &delivery.body)
            .await?;
        Ok(())
    }

    async fn release(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        // Back at the consuming end so it is redelivered first
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.keys.processing(queue, &consumer.id), 1, &delivery.body)
            .rpush(self.keys.queue(queue), &delivery.body);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn recover_in_flight(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        for processing in self.processing_lists(queue).await? {
            let Some(consumer) = self.keys.consumer_of(queue, &processing) else {
                continue;
            };
            let alive: bool = conn.exists(self.keys.lease(queue, consumer)).await?;
            if alive {
                continue;
            }

            let moved = self.requeue_list(queue, &processing).await?;
            if moved > 0 {
                debug!(queue = %queue, consumer = %consumer, moved, "Recovered lapsed lease");
            }
            recovered += moved;
        }

        Ok(recovered)
    }

    async fn retire(&self, queue: &str, consumer: &Consumer) -> Result<usize, QueueError> {
        self.blocking_connections().remove(&consumer.id);

        let moved = self
            .requeue_list(queue, &self.keys.processing(queue, &consumer.id))
            .await?;
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.keys.lease(queue, &consumer.id)).await?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisQueue {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = format!("gridflow-test-{}:", uuid::Uuid::new_v4());
        RedisQueue::connect(&url, &prefix)
            .await
            .expect("Redis must be reachable for this test")
    }

    #[test]
    fn test_keys_are_per_consumer() {
        let keys = QueueKeys {
            prefix: "gf:".to_string(),
        };
        assert_eq!(keys.queue("esdl"), "gf:esdl");
        assert_eq!(keys.processing("esdl", "w-1"), "gf:esdl:processing:w-1");
        assert_eq!(keys.lease("esdl", "w-1"), "gf:esdl:lease:w-1");
        assert_ne!(keys.processing("esdl", "w-1"), keys.processing("esdl", "w-2"));

        assert_eq!(keys.consumer_of("esdl", "gf:esdl:processing:w-1"), Some("w-1"));
        assert_eq!(keys.consumer_of("esdl", "gf:esdl:processing:"), None);
        assert_eq!(keys.consumer_of("esdl", "gf:essim:processing:w-1"), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis: cargo test -- --ignored
    async fn test_redis_receive_ack_cycle() {
        let queue = connect().await;
        let worker = Consumer::new("w", Duration::from_secs(60));
        queue.enqueue("esdl", "a").await.expect("enqueue");
        queue.enqueue("esdl", "b").await.expect("enqueue");
        queue.enqueue("esdl", "c").await.expect("enqueue");
        assert_eq!(queue.approximate_depth("esdl").await.expect("depth"), 3);

        let batch = queue
            .receive("esdl", &worker, 2, Duration::from_secs(1))
            .await
            .expect("receive");
        assert_eq!(
            batch.iter().map(|d| d.body.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(queue.in_flight_len("esdl", &worker).await.expect("len"), 2);

        queue.ack("esdl", &worker, &batch[0]).await.expect("ack");
        queue.release("esdl", &worker, &batch[1]).await.expect("release");
        assert_eq!(queue.in_flight_len("esdl", &worker).await.expect("len"), 0);
        assert_eq!(queue.approximate_depth("esdl").await.expect("depth"), 2);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis: cargo test -- --ignored
    async fn test_redis_recover_skips_live_consumers() {
        let queue = connect().await;
        let busy = Consumer::new("busy", Duration::from_secs(3600));
        queue.enqueue("essim", "x").await.expect("enqueue");
        let batch = queue
            .receive("essim", &busy, 10, Duration::from_secs(1))
            .await
            .expect("receive");
        assert_eq!(batch.len(), 1);

        // A new worker starting up must not steal the live batch
        assert_eq!(queue.recover_in_flight("essim").await.expect("recover"), 0);
        assert_eq!(queue.approximate_depth("essim").await.expect("depth"), 0);

        // Once the lease is gone the batch comes back
        let mut conn = queue.redis.clone();
        conn.del::<_, ()>(queue.keys.lease("essim", &busy.id))
            .await
            .expect("del");
        assert_eq!(queue.recover_in_flight("essim").await.expect("recover"), 1);
        assert_eq!(queue.approximate_depth("essim").await.expect("depth"), 1);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis: cargo test -- --ignored
    async fn test_redis_blocking_receive_does_not_stall_producers() {
        let queue = connect().await;
        let idle = Consumer::new("idle", Duration::from_secs(60));

        let waiting = {
            let queue = queue.clone();
            let idle = idle.clone();
            tokio::spawn(async move {
                queue
                    .receive("quiet", &idle, 1, Duration::from_secs(3))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = std::time::Instant::now();
        queue.enqueue("other", "x").await.expect("enqueue");
        assert_eq!(queue.approximate_depth("other").await.expect("depth"), 1);
        assert!(start.elapsed() < Duration::from_secs(1));

        let received = waiting.await.expect("join").expect("receive");
        assert!(received.is_empty());
        queue.retire("quiet", &idle).await.expect("retire");
    }
}
