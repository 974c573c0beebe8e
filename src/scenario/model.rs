//! Scenario data types shared by the store, the queues and the stages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Artifact references produced by stage transforms, keyed by role
/// (e.g. `updatedEsdlLocation` → `bucket/folder/updated.esdl`).
pub type ArtifactRefs = BTreeMap<String, String>;

/// Identity of one tracked scenario row.
///
/// Before fan-out a scenario is a single row (no network, no investment
/// path). A fan-out stage creates one branch row per `(network_id,
/// investment_path)` pair, and every branch then moves forward independently.
/// Two investment paths may share a network, so both fields identify a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioKey {
    /// Numeric scenario id.
    pub id: i64,
    /// Network id of a fan-out branch, `None` for the root row.
    pub network_id: Option<String>,
    /// Investment path of a fan-out branch, `None` for the root row.
    pub investment_path: Option<String>,
}

impl ScenarioKey {
    /// Key of a root (not yet fanned-out) scenario.
    pub fn root(id: i64) -> Self {
        Self {
            id,
            network_id: None,
            investment_path: None,
        }
    }

    /// Key of a fan-out branch.
    pub fn branch(
        id: i64,
        network_id: impl Into<String>,
        investment_path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            network_id: Some(network_id.into()),
            investment_path: Some(investment_path.into()),
        }
    }

    /// Returns `true` for the row that exists before fan-out.
    pub fn is_root(&self) -> bool {
        self.network_id.is_none() && self.investment_path.is_none()
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(network) = &self.network_id {
            write!(f, "/{}", network)?;
        }
        if let Some(path) = &self.investment_path {
            write!(f, "/{}", path)?;
        }
        Ok(())
    }
}

/// A scenario record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Numeric scenario id.
    #[serde(rename = "scenarioId")]
    pub id: i64,
    /// Globally unique scenario identifier.
    #[serde(rename = "scenarioUuid")]
    pub uuid: Uuid,
    /// Current recorded state label.
    #[serde(rename = "calculationState")]
    pub state: String,
    /// Opaque artifact namespace for this scenario.
    pub bucket_folder: String,
    /// Scenario year, the key into the fan-out mapping.
    #[serde(default)]
    pub scenario_year: Option<i32>,
    /// Set only after fan-out.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Set only after fan-out.
    #[serde(default)]
    pub investment_path: Option<String>,
    /// Stage-specific artifact locations.
    #[serde(default)]
    pub artifacts: ArtifactRefs,
}

impl Scenario {
    /// Creates a root scenario in the given state with no artifacts.
    pub fn new(id: i64, state: impl Into<String>, bucket_folder: impl Into<String>) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            state: state.into(),
            bucket_folder: bucket_folder.into(),
            scenario_year: None,
            network_id: None,
            investment_path: None,
            artifacts: ArtifactRefs::new(),
        }
    }

    /// Sets the scenario year.
    pub fn with_year(mut self, year: i32) -> Self {
        self.scenario_year = Some(year);
        self
    }

    /// Adds an artifact reference.
    pub fn with_artifact(mut self, role: impl Into<String>, location: impl Into<String>) -> Self {
        self.artifacts.insert(role.into(), location.into());
        self
    }

    /// Returns the store key of this scenario.
    pub fn key(&self) -> ScenarioKey {
        ScenarioKey {
            id: self.id,
            network_id: self.network_id.clone(),
            investment_path: self.investment_path.clone(),
        }
    }
}

/// Envelope carried on a queue: a snapshot of the scenario at hand-off time.
///
/// The carried `state` is the state recorded by the sender, i.e. the
/// receiver's pre-transition state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMessage {
    /// Scenario snapshot.
    #[serde(flatten)]
    pub scenario: Scenario,
    /// Number of failed processing attempts so far.
    #[serde(default)]
    pub attempt: u32,
}

impl ScenarioMessage {
    /// Wraps a scenario snapshot as a first-attempt message.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            attempt: 0,
        }
    }

    /// Serializes the message body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a message body.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Returns a copy with the attempt counter incremented.
    pub fn retried(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// How a [`ScenarioUpdate`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Move an existing row from `from_state` to the record's state.
    Advance,
    /// Create a fan-out branch row; a no-op if the branch already exists.
    Branch,
}

/// One entry of a batched state update.
///
/// `record` is the row as it must look after the write; `from_state` is the
/// pre-transition state the writer observed, which makes the write
/// verifiable: a row no longer in `from_state` is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioUpdate {
    /// Row contents after the transition.
    pub record: Scenario,
    /// State the row must currently be in.
    pub from_state: String,
    /// Advance or branch.
    pub kind: UpdateKind,
}

impl ScenarioUpdate {
    /// Advance `record.key()` from `from_state` to `record.state`.
    pub fn advance(record: Scenario, from_state: impl Into<String>) -> Self {
        Self {
            record,
            from_state: from_state.into(),
            kind: UpdateKind::Advance,
        }
    }

    /// Create the branch row `record.key()` derived from a parent in `from_state`.
    pub fn branch(record: Scenario, from_state: impl Into<String>) -> Self {
        Self {
            record,
            from_state: from_state.into(),
            kind: UpdateKind::Branch,
        }
    }

    /// Key of the row this update targets.
    pub fn key(&self) -> ScenarioKey {
        self.record.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format_uses_camel_case() {
        let scenario = Scenario::new(7, "admitted", "runs/7/")
            .with_year(2030)
            .with_artifact("baseEsdlLocation", "runs/7/base.esdl");
        let body = ScenarioMessage::new(scenario).to_body().expect("serializes");
        let value: serde_json::Value = serde_json::from_str(&body).expect("valid json");

        assert_eq!(value["scenarioId"], 7);
        assert_eq!(value["calculationState"], "admitted");
        assert_eq!(value["bucketFolder"], "runs/7/");
        assert_eq!(value["scenarioYear"], 2030);
        assert_eq!(value["artifacts"]["baseEsdlLocation"], "runs/7/base.esdl");
        assert_eq!(value["attempt"], 0);
    }

    #[test]
    fn test_message_without_attempt_defaults_to_zero() {
        let body = format!(
            r#"{{"scenarioId":1,"scenarioUuid":"{}","calculationState":"free","bucketFolder":"b/"}}"#,
            Uuid::new_v4()
        );
        let message = ScenarioMessage::from_body(&body).expect("parses");
        assert_eq!(message.attempt, 0);
        assert!(message.scenario.artifacts.is_empty());
        assert_eq!(message.scenario.key(), ScenarioKey::root(1));
    }

    #[test]
    fn test_retried_increments_attempt_only() {
        let message = ScenarioMessage::new(Scenario::new(3, "esdlUpdated", "b/"));
        let retried = message.retried().retried();
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.scenario, message.scenario);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ScenarioKey::root(4).to_string(), "4");
        assert_eq!(
            ScenarioKey::branch(4, "net-a", "path_a").to_string(),
            "4/net-a/path_a"
        );
    }

    #[test]
    fn test_branches_sharing_a_network_are_distinct() {
        let a = ScenarioKey::branch(4, "net-a", "path_a");
        let b = ScenarioKey::branch(4, "net-a", "path_b");
        assert_ne!(a, b);
        assert!(!a.is_root());
        assert!(ScenarioKey::root(4).is_root());
    }
}
