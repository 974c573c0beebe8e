//! Error types for gridflow operations.
//!
//! Defines the error types shared across subsystems:
//! - Scenario state ordering
//! - Stage transforms and stage processing
//! - Hand-off of scenarios between store and queues
//! - Admission gate runs
//! - Fleet controller calls
//!
//! Backend-specific errors (`QueueError`, `StoreError`, `ConfigError`) live
//! next to their backends and are wrapped here.

use std::time::Duration;

use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors raised by the scenario state order.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unknown state '{0}'")]
    Unknown(String),

    #[error("Transition from '{from}' to '{to}' is not a single forward step")]
    NotForward { from: String, to: String },

    #[error("State '{0}' appears more than once in the state order")]
    Duplicate(String),

    #[error("State labels cannot be empty")]
    EmptyLabel,

    #[error("State order needs at least 2 states, got {0}")]
    TooShort(usize),
}

/// Errors raised by an external stage transform or the fan-out mapping.
///
/// These are per-scenario failures: they park one scenario and never fail
/// the rest of the batch.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Transform failed: {0}")]
    Failed(String),

    #[error("Transform exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Transform timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transform produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("No expansion entries for scenario year {0:?}")]
    NoExpansion(Option<i32>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while committing a state update and forwarding messages.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that abort an admission gate run.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Reading queue depth failed: {0}")]
    QueueDepth(#[from] QueueError),

    #[error("Fetching free scenarios failed: {0}")]
    Fetch(#[from] StoreError),

    #[error("Hand-off failed: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Pipeline has no stage to admit into")]
    NoStages,
}

/// Errors that abort a stage processor invocation.
///
/// Transform failures are not in this list; they are reported per message
/// in the processing result.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage '{0}' is not configured")]
    UnknownStage(String),

    #[error("Stage '{stage}' is a fan-out stage but has no expansion source")]
    MissingExpansion { stage: String },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Hand-off failed: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by a fleet controller backend.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Orchestration backend unavailable: {0}")]
    Unavailable(String),

    #[error("Listing tasks for family '{family}' failed: {reason}")]
    ListFailed { family: String, reason: String },

    #[error("Starting {count} task(s) for family '{family}' was rejected: {reason}")]
    Rejected {
        family: String,
        count: usize,
        reason: String,
    },

    #[error("Requested {requested} tasks in one call, backend limit is {limit}")]
    BatchTooLarge { requested: usize, limit: usize },

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}
