//! Long-running processes: stage worker groups and the scheduled control loop.

pub mod control;
pub mod worker;

pub use control::{ControlLoop, ControlStats};
pub use worker::{PollOutcome, StageWorker, StageWorkerGroup, WorkerError};
