//! gridflow: scenario pipeline control plane.
//!
//! Moves scenarios through an ordered pipeline of queue-backed stages:
//!
//! ```text
//! free ──admission gate──▶ admitted ──stage 0──▶ … ──stage n──▶ terminal
//!                              │                      │
//!                         queue[0]               queue[i]      (fleet autoscaler
//!                                                               sizes each pool
//!                                                               to its backlog)
//! ```
//!
//! The library provides the admission gate, the generic stage processor
//! with fan-out, the hand-off between store and queues, and the fleet
//! autoscaler, over PostgreSQL, Redis and Docker backends.

// Core modules
pub mod admission;
pub mod autoscaler;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fleet;
pub mod handoff;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod scenario;
pub mod stage;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigError, ControlConfig};
pub use context::{ContextError, PipelineContext};
pub use error::{
    AdmissionError, FleetError, HandoffError, StageError, StateError, TransformError,
};
pub use queue::QueueError;
pub use store::StoreError;
