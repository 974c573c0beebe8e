//! Stage transform backed by an external program.
//!
//! The program receives the scenario as JSON on stdin and must print a JSON
//! object of artifact references on stdout:
//!
//! ```text
//! stdin:  {"scenarioId": 7, "calculationState": "admitted", "bucketFolder": "runs/7/", …}
//! stdout: {"updatedEsdlLocation": "runs/7/updated.esdl"}
//! ```
//!
//! Empty stdout means no new artifacts.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::transform::StageTransform;
use crate::error::TransformError;
use crate::scenario::{ArtifactRefs, Scenario};

/// Default time budget for one program run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs an external program per scenario.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    name: String,
    program: String,
    args: Vec<String>,
    env_vars: HashMap<String, String>,
    timeout: Duration,
}

impl CommandTransform {
    /// Creates a transform running `program`.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env_vars: HashMap::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Appends program arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the program.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Sets the time budget for one run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn parse_output(stdout: &[u8]) -> Result<ArtifactRefs, TransformError> {
        let text = String::from_utf8_lossy(stdout);
        let text = text.trim();
        if text.is_empty() {
            return Ok(ArtifactRefs::new());
        }

        serde_json::from_str(text).map_err(|e| {
            TransformError::InvalidOutput(format!("expected a JSON object of strings: {}", e))
        })
    }
}

#[async_trait]
impl StageTransform for CommandTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, scenario: &Scenario) -> Result<ArtifactRefs, TransformError> {
        let start = Instant::now();
        let input = serde_json::to_vec(scenario)
            .map_err(|e| TransformError::Failed(format!("Failed to serialize scenario: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("GRIDFLOW_STAGE", &self.name)
            .env("GRIDFLOW_SCENARIO_ID", scenario.id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransformError::Failed(format!("Failed to spawn {}: {}", self.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            // Dropping stdin closes the pipe so the program sees EOF
        }

        // On timeout the child is dropped and killed
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(TransformError::Timeout(self.timeout)),
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            debug!(scenario_id = scenario.id, "[{} stderr] {}", self.name, stderr);
        }

        if !output.status.success() {
            return Err(TransformError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let refs = Self::parse_output(&output.stdout)?;
        info!(
            scenario_id = scenario.id,
            transform = %self.name,
            artifacts = refs.len(),
            "Transform completed in {:?}",
            start.elapsed()
        );

        Ok(refs)
    }
}
