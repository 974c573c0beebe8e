//! In-process queue backend with the same delivery semantics as Redis.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Consumer, Delivery, MessageQueue, MessageSource, QueueError};

#[derive(Debug, Default)]
struct InFlight {
    bodies: Vec<String>,
    lease_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<String>,
    in_flight: BTreeMap<String, InFlight>,
}

impl QueueState {
    fn take_in_flight(&mut self, consumer: &str, delivery: &Delivery) -> Option<String> {
        let held = self.in_flight.get_mut(consumer)?;
        let pos = held.bodies.iter().position(|b| b == &delivery.body)?;
        Some(held.bodies.remove(pos))
    }

    fn requeue_all(&mut self, consumer: &str) -> usize {
        let Some(held) = self.in_flight.remove(consumer) else {
            return 0;
        };
        let count = held.bodies.len();
        for body in held.bodies.into_iter().rev() {
            self.ready.push_front(body);
        }
        count
    }
}

/// Queues held in process memory.
///
/// Receive never blocks; an empty queue returns an empty batch immediately.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryQueue {
    /// Creates an empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(queues.entry(queue.to_string()).or_default())
    }

    /// Bodies waiting in a queue, oldest first.
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.with_queue(queue, |state| state.ready.iter().cloned().collect())
    }

    /// Bodies received from a queue and not yet acked or released, across
    /// consumers.
    pub fn in_flight(&self, queue: &str) -> Vec<String> {
        self.with_queue(queue, |state| {
            state
                .in_flight
                .values()
                .flat_map(|held| held.bodies.iter().cloned())
                .collect()
        })
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        self.with_queue(queue, |state| state.ready.push_back(body.to_string()));
        Ok(())
    }

    async fn approximate_depth(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.with_queue(queue, |state| state.ready.len() as u64))
    }
}

#[async_trait]
impl MessageSource for MemoryQueue {
    async fn receive(
        &self,
        queue: &str,
        consumer: &Consumer,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        Ok(self.with_queue(queue, |state| {
            let held = state.in_flight.entry(consumer.id.clone()).or_default();
            held.lease_until = Some(Instant::now() + wait + consumer.lease);

            let take = max.min(state.ready.len());
            let bodies: Vec<String> = state.ready.drain(..take).collect();
            held.bodies.extend(bodies.iter().cloned());
            bodies.into_iter().map(Delivery::new).collect()
        }))
    }

    async fn ack(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| state.take_in_flight(&consumer.id, delivery));
        Ok(())
    }

    async fn release(
        &self,
        queue: &str,
        consumer: &Consumer,
        delivery: &Delivery,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            if let Some(body) = state.take_in_flight(&consumer.id, delivery) {
                state.ready.push_front(body);
            }
        });
        Ok(())
    }

    async fn recover_in_flight(&self, queue: &str) -> Result<usize, QueueError> {
        let now = Instant::now();
        Ok(self.with_queue(queue, |state| {
            let lapsed: Vec<String> = state
                .in_flight
                .iter()
                .filter(|(_, held)| held.lease_until.map_or(true, |until| until <= now))
                .map(|(id, _)| id.clone())
                .collect();
            lapsed.iter().map(|id| state.requeue_all(id)).sum()
        }))
    }

    async fn retire(&self, queue: &str, consumer: &Consumer) -> Result<usize, QueueError> {
        Ok(self.with_queue(queue, |state| state.requeue_all(&consumer.id)))
    }
}
