//! Command-line interface for gridflow.
//!
//! Provides commands for admission, autoscaling, outbox relay, stage
//! workers, the scheduled control loop, migrations and status.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
