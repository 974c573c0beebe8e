//! Scenario store: the system of record for scenario states.
//!
//! # Overview
//!
//! - **ScenarioStore**: trait implemented by every backend
//! - **PgScenarioStore**: PostgreSQL backend (sqlx)
//! - **MemoryStore**: in-process backend with the same write rules
//! - **Migrations**: schema management and versioning
//!
//! # Write rules
//!
//! A batch of [`ScenarioUpdate`]s is applied in one transaction.
//!
//! - `Advance` moves a row only if it is still in `from_state`. A replayed or
//!   concurrent update therefore affects nothing: state never moves backward
//!   and never skips a step.
//! - `Branch` creates a fan-out row only if its root row already holds the
//!   branch's state, and is a no-op when the branch exists.
//!
//! Both calls return the keys that were actually written. Callers forward
//! messages only for those keys.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;

use crate::scenario::{Scenario, ScenarioKey, ScenarioUpdate};

pub use memory::MemoryStore;
pub use migrations::{MigrationError, MigrationRunner, MigrationStatus};
pub use postgres::PgScenarioStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// A message to publish once its scenario update has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Row whose update gates this message.
    pub key: ScenarioKey,
    /// Destination queue.
    pub queue: String,
    /// Serialized message body.
    pub body: String,
}

/// A pending outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Outbox row id.
    pub id: i64,
    /// Destination queue.
    pub queue: String,
    /// Serialized message body.
    pub body: String,
}

/// Number of scenarios per state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCount {
    /// State label.
    pub state: String,
    /// Rows currently in that state.
    pub count: u64,
}

/// Storage backend for scenario records.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    /// Fetches up to `limit` scenarios in `state`, oldest id first.
    async fn fetch_eligible(&self, state: &str, limit: usize)
        -> Result<Vec<Scenario>, StoreError>;

    /// Applies a batch of updates in one transaction.
    ///
    /// Returns the keys of the rows that were written.
    async fn bulk_update_state(
        &self,
        updates: &[ScenarioUpdate],
    ) -> Result<Vec<ScenarioKey>, StoreError>;

    /// Applies a batch of updates and records outgoing messages in the same
    /// transaction. An entry is recorded only if its key was written.
    async fn bulk_update_with_outbox(
        &self,
        updates: &[ScenarioUpdate],
        outgoing: &[OutboxEntry],
    ) -> Result<Vec<ScenarioKey>, StoreError>;

    /// Oldest unsent outbox rows.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Marks outbox rows as published.
    async fn mark_outbox_sent(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Looks up one scenario row.
    async fn get(&self, key: &ScenarioKey) -> Result<Option<Scenario>, StoreError>;

    /// Row counts per state.
    async fn count_by_state(&self) -> Result<Vec<StateCount>, StoreError>;
}
