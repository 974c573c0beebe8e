//! Control-plane configuration.
//!
//! Loaded once at process start from a YAML file, then overridden from the
//! environment, then validated. The result is shared read-only (behind an
//! `Arc`) by every component.
//!
//! # Example
//!
//! ```yaml
//! database_url: postgres://localhost/gridflow
//! redis_url: redis://localhost:6379
//! pipeline:
//!   stages:
//!     - { name: esdl_updater, queue: esdl, next_state: esdlUpdated }
//!     - { name: essim_export, queue: essim, next_state: essimExported }
//!     - { name: fanout, queue: fanout, next_state: fannedOut, fan_out: true }
//!     - { name: loadflow, queue: loadflow, next_state: loadFlowDone }
//! admission:
//!   rate_limit_per_minute: 60
//!   monitors:
//!     - { queue: esdl, threshold: { count: 20 } }
//!     - { queue: essim, threshold: { rate_limit_divisor: 1 } }
//! fleet:
//!   cluster: gridflow
//!   pools:
//!     - { family: essim, queue: essim, task_definition: "gridflow/essim:latest", container_limit: 20 }
//!   network_policies:
//!     default: { subnets: [subnet-a], security_groups: [sg-general] }
//!     families:
//!       essim: { subnets: [subnet-a], security_groups: [sg-essim] }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StateError;
use crate::fleet::policy::{NetworkPolicy, NetworkPolicyTable};
use crate::handoff::HandoffMode;
use crate::scenario::StateOrder;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Stage name used by `gridflow worker --stage`.
    pub name: String,
    /// Queue this stage consumes from.
    pub queue: String,
    /// State recorded after this stage succeeds.
    pub next_state: String,
    /// Whether this stage expands one scenario into several.
    #[serde(default)]
    pub fan_out: bool,
}

impl StageSettings {
    /// Creates a linear stage.
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        next_state: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            next_state: next_state.into(),
            fan_out: false,
        }
    }

    /// Marks the stage as the fan-out point.
    pub fn fan_out(mut self) -> Self {
        self.fan_out = true;
        self
    }
}

/// The ordered pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// State eligible for admission.
    pub free_state: String,
    /// State recorded by the admission gate.
    pub admitted_state: String,
    /// Stages in processing order.
    pub stages: Vec<StageSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            free_state: "free".to_string(),
            admitted_state: "admitted".to_string(),
            stages: vec![
                StageSettings::new("esdl_updater", "esdl", "esdlUpdated"),
                StageSettings::new("essim_export", "essim", "essimExported"),
                StageSettings::new("post_processing_fanout", "fanout", "fannedOut").fan_out(),
                StageSettings::new("post_processing", "post-processing", "postProcessingDone"),
                StageSettings::new("loadflow", "loadflow", "loadFlowDone"),
            ],
        }
    }
}

impl PipelineSettings {
    /// `[free_state, admitted_state, stages[0].next_state, …]`.
    pub fn state_order(&self) -> Result<StateOrder, StateError> {
        let states = [self.free_state.clone(), self.admitted_state.clone()]
            .into_iter()
            .chain(self.stages.iter().map(|s| s.next_state.clone()));
        StateOrder::new(states)
    }

    /// Queue the admission gate feeds.
    pub fn first_queue(&self) -> Option<&str> {
        self.stages.first().map(|s| s.queue.as_str())
    }

    /// Position and settings of a stage by name.
    pub fn stage(&self, name: &str) -> Option<(usize, &StageSettings)> {
        self.stages.iter().enumerate().find(|(_, s)| s.name == name)
    }
}

/// Admission threshold for one monitored queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// Fixed message count.
    Count { count: u64 },
    /// `rate_limit_per_minute / rate_limit_divisor`.
    RateLimitDivisor { rate_limit_divisor: u64 },
}

impl Threshold {
    /// The threshold as a message count.
    pub fn resolve(&self, rate_limit_per_minute: u64) -> u64 {
        match *self {
            Threshold::Count { count } => count,
            Threshold::RateLimitDivisor { rate_limit_divisor } => {
                rate_limit_per_minute / rate_limit_divisor.max(1)
            }
        }
    }
}

/// A downstream queue the admission gate watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMonitor {
    /// Queue to watch.
    pub queue: String,
    /// Admission is skipped when the depth exceeds this.
    pub threshold: Threshold,
}

/// Admission gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Upstream API request budget per minute.
    pub rate_limit_per_minute: u64,
    /// Batch size is `rate_limit_per_minute / batch_divisor`, rounded.
    pub batch_divisor: u64,
    /// Downstream queues that block admission when saturated.
    pub monitors: Vec<QueueMonitor>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            batch_divisor: 6,
            monitors: vec![
                QueueMonitor {
                    queue: "esdl".to_string(),
                    threshold: Threshold::Count { count: 20 },
                },
                QueueMonitor {
                    queue: "essim".to_string(),
                    threshold: Threshold::RateLimitDivisor {
                        rate_limit_divisor: 1,
                    },
                },
            ],
        }
    }
}

impl AdmissionSettings {
    /// Maximum scenarios admitted per run, at least 1.
    pub fn batch_size(&self) -> usize {
        let divisor = self.batch_divisor.max(1);
        let rounded = (self.rate_limit_per_minute + divisor / 2) / divisor;
        rounded.max(1) as usize
    }
}

/// One autoscaled worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Pool name.
    pub family: String,
    /// Queue whose backlog drives the pool.
    pub queue: String,
    /// What to start (a container image for the Docker backend).
    pub task_definition: String,
    /// Hard cap on running tasks.
    pub container_limit: u64,
}

/// Fleet autoscaler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// Cluster the pools run in.
    pub cluster: String,
    /// Maximum tasks started per backend call.
    pub batch_limit: usize,
    /// Backlog divisor applied before capping.
    pub damping_divisor: u64,
    /// Autoscaled pools.
    pub pools: Vec<PoolSettings>,
    /// Network placement per family.
    pub network_policies: NetworkPolicyTable,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            cluster: "gridflow".to_string(),
            batch_limit: 10,
            damping_divisor: 2,
            pools: Vec::new(),
            network_policies: NetworkPolicyTable::new(NetworkPolicy::default()),
        }
    }
}

/// Stage worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRuntimeSettings {
    /// Maximum messages per processor invocation.
    pub max_batch: usize,
    /// Longest wait for the first message of a batch.
    pub poll_interval_secs: u64,
    /// Time budget for one processor invocation.
    pub processing_timeout_secs: u64,
    /// Processing attempts before a message is parked.
    pub max_attempts: u32,
    /// Park exhausted messages on the dead-letter queue.
    pub dead_letter: bool,
}

impl Default for StageRuntimeSettings {
    fn default() -> Self {
        Self {
            max_batch: 10,
            poll_interval_secs: 5,
            processing_timeout_secs: 900,
            max_attempts: 1,
            dead_letter: true,
        }
    }
}

impl StageRuntimeSettings {
    /// Poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Processing timeout as a Duration.
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

/// Control loop intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Seconds between admission gate runs.
    pub admission_interval_secs: u64,
    /// Seconds between autoscaler runs.
    pub autoscale_interval_secs: u64,
    /// Seconds between outbox relay passes.
    pub outbox_interval_secs: u64,
    /// Outbox rows published per relay pass.
    pub outbox_batch: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            admission_interval_secs: 60,
            autoscale_interval_secs: 60,
            outbox_interval_secs: 5,
            outbox_batch: 100,
        }
    }
}

/// Complete control-plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix for every Redis queue key.
    pub queue_prefix: String,
    /// Pipeline shape.
    pub pipeline: PipelineSettings,
    /// Admission gate.
    pub admission: AdmissionSettings,
    /// Fleet autoscaler.
    pub fleet: FleetSettings,
    /// Stage workers.
    pub stage_runtime: StageRuntimeSettings,
    /// How updates and messages are committed.
    pub handoff_mode: HandoffMode,
    /// Control loop intervals.
    pub schedule: ScheduleSettings,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/gridflow".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            queue_prefix: "gridflow:".to_string(),
            pipeline: PipelineSettings::default(),
            admission: AdmissionSettings::default(),
            fleet: FleetSettings::default(),
            stage_runtime: StageRuntimeSettings::default(),
            handoff_mode: HandoffMode::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl ControlConfig {
    /// Loads a YAML file, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses YAML without overrides or validation.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `REDIS_URL`: Redis connection URL
    /// - `GRIDFLOW_RATE_LIMIT_PER_MINUTE`: upstream request budget
    /// - `GRIDFLOW_FLEET_BATCH_LIMIT`: tasks started per backend call
    /// - `GRIDFLOW_HANDOFF_MODE`: `update_then_enqueue` or `outbox`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DATABASE_URL") {
            self.database_url = val;
        }

        if let Some(val) = lookup("REDIS_URL") {
            self.redis_url = val;
        }

        if let Some(val) = lookup("GRIDFLOW_RATE_LIMIT_PER_MINUTE") {
            self.admission.rate_limit_per_minute =
                parse_env_value(&val, "GRIDFLOW_RATE_LIMIT_PER_MINUTE")?;
        }

        if let Some(val) = lookup("GRIDFLOW_FLEET_BATCH_LIMIT") {
            self.fleet.batch_limit = parse_env_value(&val, "GRIDFLOW_FLEET_BATCH_LIMIT")?;
        }

        if let Some(val) = lookup("GRIDFLOW_HANDOFF_MODE") {
            self.handoff_mode = parse_env_value(&val, "GRIDFLOW_HANDOFF_MODE")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(invalid("database_url cannot be empty"));
        }

        if self.redis_url.is_empty() {
            return Err(invalid("redis_url cannot be empty"));
        }

        // Pipeline validation
        if self.pipeline.stages.is_empty() {
            return Err(invalid("pipeline.stages cannot be empty"));
        }

        self.pipeline
            .state_order()
            .map_err(|e| ConfigError::ValidationFailed(format!("pipeline states: {}", e)))?;

        let mut names = HashSet::new();
        for stage in &self.pipeline.stages {
            if stage.name.is_empty() || stage.queue.is_empty() {
                return Err(invalid("stage name and queue cannot be empty"));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }

        if self.pipeline.stages.iter().filter(|s| s.fan_out).count() > 1 {
            return Err(invalid("at most one stage can have fan_out"));
        }

        // Admission validation
        if self.admission.batch_divisor == 0 {
            return Err(invalid("admission.batch_divisor must be greater than 0"));
        }

        let stage_queues: HashSet<&str> = self
            .pipeline
            .stages
            .iter()
            .map(|s| s.queue.as_str())
            .chain(self.fleet.pools.iter().map(|p| p.queue.as_str()))
            .collect();
        for monitor in &self.admission.monitors {
            if !stage_queues.contains(monitor.queue.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "admission monitor references unknown queue '{}'",
                    monitor.queue
                )));
            }
            if let Threshold::RateLimitDivisor {
                rate_limit_divisor: 0,
            } = monitor.threshold
            {
                return Err(invalid("rate_limit_divisor must be greater than 0"));
            }
        }

        // Fleet validation
        if self.fleet.batch_limit == 0 {
            return Err(invalid("fleet.batch_limit must be greater than 0"));
        }

        if self.fleet.damping_divisor == 0 {
            return Err(invalid("fleet.damping_divisor must be greater than 0"));
        }

        let mut families = HashSet::new();
        for pool in &self.fleet.pools {
            if pool.family.is_empty() || pool.queue.is_empty() {
                return Err(invalid("pool family and queue cannot be empty"));
            }
            if !families.insert(pool.family.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate pool family '{}'",
                    pool.family
                )));
            }
        }

        // Stage runtime validation
        if self.stage_runtime.max_batch == 0 {
            return Err(invalid("stage_runtime.max_batch must be greater than 0"));
        }

        if self.stage_runtime.max_attempts == 0 {
            return Err(invalid("stage_runtime.max_attempts must be greater than 0"));
        }

        if self.stage_runtime.processing_timeout_secs == 0 {
            return Err(invalid(
                "stage_runtime.processing_timeout_secs must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to set the handoff mode.
    pub fn with_handoff_mode(mut self, mode: HandoffMode) -> Self {
        self.handoff_mode = mode;
        self
    }

    /// Builder method to replace the pipeline stages.
    pub fn with_stages(mut self, stages: Vec<StageSettings>) -> Self {
        self.pipeline.stages = stages;
        self
    }

    /// Builder method to add an autoscaled pool.
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.fleet.pools.push(pool);
        self
    }

    /// Builder method to set the stage retry budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.stage_runtime.max_attempts = attempts;
        self
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationFailed(message.to_string())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admission.batch_size(), 10);
        assert_eq!(config.fleet.batch_limit, 10);
        assert_eq!(config.fleet.damping_divisor, 2);
        assert_eq!(config.handoff_mode, HandoffMode::UpdateThenEnqueue);
        assert_eq!(config.stage_runtime.max_attempts, 1);
        assert!(config.stage_runtime.dead_letter);
    }

    #[test]
    fn test_state_order_from_pipeline() {
        let pipeline = PipelineSettings::default();
        let order = pipeline.state_order().unwrap();
        assert_eq!(order.initial(), "free");
        assert_eq!(order.nth(1), Some("admitted"));
        assert_eq!(order.nth(2), Some("esdlUpdated"));
        assert_eq!(order.terminal(), "loadFlowDone");
        assert_eq!(pipeline.first_queue(), Some("esdl"));
        assert_eq!(pipeline.stage("essim_export").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_threshold_resolution() {
        assert_eq!(Threshold::Count { count: 20 }.resolve(60), 20);
        assert_eq!(
            Threshold::RateLimitDivisor {
                rate_limit_divisor: 6
            }
            .resolve(60),
            10
        );
    }

    #[test]
    fn test_batch_size_rounds_and_floors_at_one() {
        let mut admission = AdmissionSettings::default();
        admission.rate_limit_per_minute = 40;
        assert_eq!(admission.batch_size(), 7); // 6.67 rounds up
        admission.rate_limit_per_minute = 2;
        assert_eq!(admission.batch_size(), 1);
        admission.rate_limit_per_minute = 0;
        assert_eq!(admission.batch_size(), 1);
    }

    #[test]
    fn test_from_yaml_with_thresholds() {
        let yaml = r#"
database_url: postgres://db/gridflow
pipeline:
  stages:
    - { name: a, queue: qa, next_state: aDone }
    - { name: b, queue: qb, next_state: bDone, fan_out: true }
admission:
  rate_limit_per_minute: 120
  monitors:
    - { queue: qa, threshold: { count: 20 } }
    - { queue: qb, threshold: { rate_limit_divisor: 6 } }
fleet:
  pools:
    - { family: b, queue: qb, task_definition: "img:b", container_limit: 5 }
handoff_mode: outbox
"#;
        let config = ControlConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.database_url, "postgres://db/gridflow");
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert!(config.pipeline.stages[1].fan_out);
        assert_eq!(
            config.admission.monitors[1].threshold.resolve(120),
            20
        );
        assert_eq!(config.fleet.pools[0].container_limit, 5);
        assert_eq!(config.handoff_mode, HandoffMode::Outbox);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6379"),
            ("GRIDFLOW_RATE_LIMIT_PER_MINUTE", "30"),
            ("GRIDFLOW_FLEET_BATCH_LIMIT", "5"),
            ("GRIDFLOW_HANDOFF_MODE", "outbox"),
        ]
        .into_iter()
        .collect();

        let mut config = ControlConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.admission.rate_limit_per_minute, 30);
        assert_eq!(config.admission.batch_size(), 5);
        assert_eq!(config.fleet.batch_limit, 5);
        assert_eq!(config.handoff_mode, HandoffMode::Outbox);
    }

    #[test]
    fn test_invalid_override_value() {
        let mut config = ControlConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "GRIDFLOW_FLEET_BATCH_LIMIT").then(|| "ten".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validation_rejects_two_fan_out_stages() {
        let config = ControlConfig::default().with_stages(vec![
            StageSettings::new("a", "qa", "aDone").fan_out(),
            StageSettings::new("b", "qb", "bDone").fan_out(),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fan_out"));
    }

    #[test]
    fn test_validation_rejects_duplicate_states() {
        let config = ControlConfig::default().with_stages(vec![
            StageSettings::new("a", "esdl", "done"),
            StageSettings::new("b", "essim", "done"),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("done"));
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = ControlConfig::default();
        config.fleet.batch_limit = 0;
        assert!(config.validate().is_err());

        let mut config = ControlConfig::default();
        config.fleet.damping_divisor = 0;
        assert!(config.validate().is_err());

        let config = ControlConfig::default().with_max_attempts(0);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_attempts"));
    }

    #[test]
    fn test_validation_rejects_duplicate_families() {
        let pool = PoolSettings {
            family: "essim".to_string(),
            queue: "essim".to_string(),
            task_definition: "img".to_string(),
            container_limit: 3,
        };
        let config = ControlConfig::default()
            .with_pool(pool.clone())
            .with_pool(pool);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("duplicate pool family"));
    }

    #[test]
    fn test_validation_rejects_unknown_monitor_queue() {
        let mut config = ControlConfig::default();
        config.admission.monitors.push(QueueMonitor {
            queue: "nowhere".to_string(),
            threshold: Threshold::Count { count: 1 },
        });
        assert!(config.validate().unwrap_err().to_string().contains("nowhere"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue_prefix: \"test:\"\nschedule:\n  autoscale_interval_secs: 30").unwrap();

        let config = ControlConfig::load(file.path()).unwrap();
        assert_eq!(config.queue_prefix, "test:");
        assert_eq!(config.schedule.autoscale_interval_secs, 30);
        assert_eq!(config.schedule.admission_interval_secs, 60);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ControlConfig::load("/nonexistent/gridflow.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
