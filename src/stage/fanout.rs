//! Fan-out expansion: one scenario becomes one branch per mapping entry.
//!
//! The mapping file is keyed by scenario year and lists, per investment
//! path, the network the branch runs against:
//!
//! ```yaml
//! "2030":
//!   path_a: net-1
//!   path_b: net-2
//! "2040":
//!   path_a: net-3
//! ```
//!
//! JSON with the same shape is accepted as well.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TransformError;
use crate::scenario::{Scenario, ScenarioKey};

/// Errors raised while loading an expansion mapping.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mapping: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One branch produced by fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expansion {
    /// Network the branch runs against.
    pub network_id: String,
    /// Investment path of the branch. Several paths may share a network.
    pub investment_path: String,
}

impl Expansion {
    /// Creates an expansion entry.
    pub fn new(network_id: impl Into<String>, investment_path: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            investment_path: investment_path.into(),
        }
    }

    /// Store key of this branch of scenario `id`.
    pub fn key(&self, id: i64) -> ScenarioKey {
        ScenarioKey::branch(id, &self.network_id, &self.investment_path)
    }
}

/// Supplies the expansion keys for a scenario.
#[async_trait]
pub trait ExpansionSource: Send + Sync {
    /// Expansion entries for one scenario. An empty list is an error.
    async fn expansions(&self, scenario: &Scenario) -> Result<Vec<Expansion>, TransformError>;
}

/// Drops repeated `(network_id, investment_path)` pairs, keeping the first
/// occurrence.
pub fn dedupe_expansions(expansions: Vec<Expansion>) -> Vec<Expansion> {
    let mut seen = HashSet::new();
    expansions
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

/// Static year → {investment path → network id} mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvestmentMapping {
    years: BTreeMap<String, BTreeMap<String, String>>,
}

impl InvestmentMapping {
    /// Loads a YAML or JSON mapping file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parses a YAML or JSON mapping.
    pub fn from_yaml(contents: &str) -> Result<Self, MappingError> {
        let years = serde_yaml::from_str(contents)?;
        Ok(Self { years })
    }

    /// Adds one entry.
    pub fn with_entry(
        mut self,
        year: i32,
        investment_path: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        self.years
            .entry(year.to_string())
            .or_default()
            .insert(investment_path.into(), network_id.into());
        self
    }

    /// Entries for a year, ordered by investment path.
    pub fn entries(&self, year: i32) -> Vec<Expansion> {
        self.years
            .get(&year.to_string())
            .map(|paths| {
                paths
                    .iter()
                    .map(|(path, network)| Expansion::new(network, path))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExpansionSource for InvestmentMapping {
    async fn expansions(&self, scenario: &Scenario) -> Result<Vec<Expansion>, TransformError> {
        let year = scenario
            .scenario_year
            .ok_or(TransformError::NoExpansion(None))?;

        let entries = dedupe_expansions(self.entries(year));
        if entries.is_empty() {
            return Err(TransformError::NoExpansion(Some(year)));
        }

        Ok(entries)
    }
}
