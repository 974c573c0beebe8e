//! CLI command definitions for gridflow.
//!
//! Every command loads the control configuration once, builds a
//! [`PipelineContext`] and runs one component of the control plane.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::admission::{AdmissionGate, AdmissionOutcome};
use crate::autoscaler::FleetAutoscaler;
use crate::config::ControlConfig;
use crate::context::PipelineContext;
use crate::fleet::DockerFleet;
use crate::handoff::OutboxRelay;
use crate::metrics::{export_metrics_named, init_metrics, MetricsCollector, QUEUE_DEPTH_METRIC};
use crate::runtime::{ControlLoop, StageWorkerGroup};
use crate::stage::{
    CommandTransform, InvestmentMapping, PassthroughTransform, StageProcessor, StageTransform,
};
use crate::store::PgScenarioStore;

/// Scenario pipeline control plane.
#[derive(Parser)]
#[command(name = "gridflow")]
#[command(about = "Admit scenarios, run pipeline stages and autoscale worker pools")]
#[command(version)]
#[command(
    long_about = "gridflow moves scenarios through an ordered pipeline of queue-backed stages.\n\nExample usage:\n  gridflow --config gridflow.yaml migrate\n  gridflow --config gridflow.yaml run\n  gridflow --config gridflow.yaml worker --stage esdl_updater --command ./update-esdl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML control configuration.
    #[arg(short, long, env = "GRIDFLOW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one admission gate cycle.
    Admit,

    /// Run one fleet autoscaler pass.
    Autoscale,

    /// Publish pending outbox rows.
    Relay(RelayArgs),

    /// Run admission, autoscaling and outbox relay on their schedules until Ctrl-C.
    Run(RunArgs),

    /// Consume one stage queue until Ctrl-C.
    Worker(WorkerArgs),

    /// Apply database migrations.
    Migrate(MigrateArgs),

    /// Show scenario counts per state and queue depths.
    Status(StatusArgs),
}

/// Arguments for `gridflow relay`.
#[derive(Parser, Debug)]
pub struct RelayArgs {
    /// Keep publishing until the outbox is empty.
    #[arg(long)]
    pub all: bool,
}

/// Arguments for `gridflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Do not run the fleet autoscaler.
    #[arg(long)]
    pub no_autoscale: bool,
}

/// Arguments for `gridflow worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Configured stage name.
    #[arg(short, long)]
    pub stage: String,

    /// Program implementing the stage transform. Omit for a pure fan-out stage.
    #[arg(long)]
    pub command: Option<String>,

    /// Arguments passed to the transform program.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Year → investment path → network mapping for the fan-out stage.
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Time budget for one transform run, in seconds.
    #[arg(long, default_value = "600")]
    pub transform_timeout: u64,

    /// Number of concurrent workers.
    #[arg(short = 'n', long, default_value = "1")]
    pub workers: usize,
}

/// Arguments for `gridflow migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// List each migration and when it was applied, without applying anything.
    #[arg(long)]
    pub list: bool,
}

/// Arguments for `gridflow status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the queue depth gauges in Prometheus text format after the summary.
    ///
    /// Only the depths read by this command are printed. Counters are only
    /// advanced inside `run` and `worker` processes.
    #[arg(long)]
    pub metrics: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Admit => run_admit_command(config).await,
        Commands::Autoscale => run_autoscale_command(config).await,
        Commands::Relay(args) => run_relay_command(config, args).await,
        Commands::Run(args) => run_control_command(config, args).await,
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Migrate(args) => run_migrate_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ControlConfig> {
    match path {
        Some(path) => ControlConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = ControlConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

async fn connect(config: ControlConfig) -> anyhow::Result<PipelineContext> {
    PipelineContext::connect(config)
        .await
        .context("Failed to connect to the store and queue backends")
}

async fn run_admit_command(config: ControlConfig) -> anyhow::Result<()> {
    let ctx = connect(config).await?;
    match AdmissionGate::new(ctx).run_once().await? {
        AdmissionOutcome::Skipped {
            queue,
            depth,
            threshold,
        } => println!(
            "Skipped: queue '{}' depth {} exceeds threshold {}",
            queue, depth, threshold
        ),
        AdmissionOutcome::Admitted {
            fetched,
            admitted,
            forwarded,
        } => println!(
            "Admitted {} of {} fetched scenarios ({} forwarded)",
            admitted, fetched, forwarded
        ),
    }
    Ok(())
}

async fn run_autoscale_command(config: ControlConfig) -> anyhow::Result<()> {
    let fleet = Arc::new(DockerFleet::connect(config.fleet.batch_limit)?);
    let ctx = connect(config).await?;
    let report = FleetAutoscaler::new(ctx, fleet).run_once().await;

    for pool in &report.pools {
        let queue_length = pool
            .queue_length
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let running = pool
            .running
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        match &pool.error {
            Some(e) => println!(
                "{:<24} queue={:<6} running={:<4} started={} error: {}",
                pool.family, queue_length, running, pool.started, e
            ),
            None => println!(
                "{:<24} queue={:<6} running={:<4} started={}",
                pool.family, queue_length, running, pool.started
            ),
        }
    }
    println!("Started {} task(s)", report.started());

    if report.failed() > 0 {
        anyhow::bail!("{} pool(s) failed", report.failed());
    }
    Ok(())
}

async fn run_relay_command(config: ControlConfig, args: RelayArgs) -> anyhow::Result<()> {
    let batch = config.schedule.outbox_batch;
    let ctx = connect(config).await?;
    let relay = OutboxRelay::new(ctx.store(), ctx.queue()).with_batch_size(batch);

    let mut total = 0;
    loop {
        let published = relay.drain_once().await?;
        total += published;
        if !args.all || published == 0 {
            break;
        }
    }
    println!("Published {} outbox message(s)", total);
    Ok(())
}

async fn run_control_command(config: ControlConfig, args: RunArgs) -> anyhow::Result<()> {
    let batch_limit = config.fleet.batch_limit;
    let ctx = connect(config).await?;

    let mut control = ControlLoop::new(ctx);
    if !args.no_autoscale {
        control = control.with_autoscaler(Arc::new(DockerFleet::connect(batch_limit)?));
    }

    let stats = control.run_until(shutdown_signal()).await;
    info!(
        admitted = stats.admitted,
        tasks_started = stats.tasks_started,
        relayed = stats.relayed,
        errors = stats.errors,
        "Control loop finished"
    );
    Ok(())
}

async fn run_worker_command(config: ControlConfig, args: WorkerArgs) -> anyhow::Result<()> {
    let ctx = connect(config).await?;

    let transform: Arc<dyn StageTransform> = match &args.command {
        Some(program) => Arc::new(
            CommandTransform::new(&args.stage, program)
                .with_args(args.args.iter().cloned())
                .with_timeout(Duration::from_secs(args.transform_timeout)),
        ),
        None => Arc::new(PassthroughTransform),
    };

    let mut processor = StageProcessor::new(ctx.clone(), &args.stage, transform)?;
    if let Some(path) = &args.mapping {
        let mapping = InvestmentMapping::load(path)
            .with_context(|| format!("Failed to load mapping from {}", path.display()))?;
        processor = processor.with_expansion(Arc::new(mapping));
    } else if processor.spec().fan_out {
        anyhow::bail!("Stage '{}' is a fan-out stage and needs --mapping", args.stage);
    }

    let mut group = StageWorkerGroup::new(ctx, processor, args.workers);
    group.start().await?;
    shutdown_signal().await;
    group.shutdown().await?;
    Ok(())
}

async fn run_migrate_command(config: ControlConfig, args: MigrateArgs) -> anyhow::Result<()> {
    let store = PgScenarioStore::connect(&config.database_url).await?;
    if args.list {
        for status in store.migration_status().await? {
            match status.applied_at {
                Some(at) => println!("  {:<32} applied {}", status.name, at.to_rfc3339()),
                None => println!("  {:<32} pending", status.name),
            }
        }
        return Ok(());
    }

    let applied = store.run_migrations().await?;
    if applied.is_empty() {
        println!("Schema is up to date");
    } else {
        for name in &applied {
            println!("Applied {}", name);
        }
    }
    Ok(())
}

async fn run_status_command(config: ControlConfig, args: StatusArgs) -> anyhow::Result<()> {
    let ctx = connect(config).await?;
    let metrics = MetricsCollector::new();

    println!("Scenarios by state:");
    let counts = ctx.store().count_by_state().await?;
    for state in ctx.states().states() {
        let count = counts
            .iter()
            .find(|c| &c.state == state)
            .map_or(0, |c| c.count);
        println!("  {:<24} {}", state, count);
    }

    println!("Queue depths:");
    let queue = ctx.queue();
    for stage in &ctx.config().pipeline.stages {
        let depth = queue.approximate_depth(&stage.queue).await?;
        metrics.update_queue_depth(&stage.queue, depth);
        println!("  {:<24} {}", stage.queue, depth);
    }

    if args.metrics {
        println!();
        print!("{}", export_metrics_named(&[QUEUE_DEPTH_METRIC]));
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_worker_command() {
        let cli = Cli::try_parse_from([
            "gridflow",
            "--config",
            "gridflow.yaml",
            "worker",
            "--stage",
            "post_processing_fanout",
            "--mapping",
            "mapping.yaml",
            "-n",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("gridflow.yaml")));
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.stage, "post_processing_fanout");
                assert!(args.command.is_none());
                assert_eq!(args.mapping, Some(PathBuf::from("mapping.yaml")));
                assert_eq!(args.workers, 4);
                assert_eq!(args.transform_timeout, 600);
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn test_parse_worker_program_args() {
        let cli = Cli::try_parse_from([
            "gridflow",
            "worker",
            "--stage",
            "essim_export",
            "--command",
            "essim-run",
            "--arg",
            "--fast",
            "--arg",
            "--quiet",
        ])
        .unwrap();

        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.command.as_deref(), Some("essim-run"));
                assert_eq!(args.args, vec!["--fast", "--quiet"]);
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn test_parse_status_and_relay() {
        let cli = Cli::try_parse_from(["gridflow", "status", "--metrics"]).unwrap();
        assert!(matches!(cli.command, Commands::Status(StatusArgs { metrics: true })));

        let cli = Cli::try_parse_from(["gridflow", "migrate", "--list"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate(MigrateArgs { list: true })));
        let cli = Cli::try_parse_from(["gridflow", "migrate"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate(MigrateArgs { list: false })));

        let cli = Cli::try_parse_from(["gridflow", "relay", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Relay(RelayArgs { all: true })));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridflow.yaml");
        std::fs::write(
            &path,
            "admission:\n  rate_limit_per_minute: 120\nhandoff_mode: outbox\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.admission.batch_size(), 20);
        assert_eq!(config.handoff_mode, crate::handoff::HandoffMode::Outbox);

        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
