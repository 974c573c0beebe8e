//! Static network policy table keyed by worker-pool family.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Network placement for tasks of one family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Subnets tasks may be placed in.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Security groups attached to every task.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Whether tasks are reachable from outside the host network.
    #[serde(default)]
    pub assign_public_ip: bool,
}

impl NetworkPolicy {
    /// Creates a policy from subnets and security groups.
    pub fn new<S, G>(subnets: S, security_groups: G) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            subnets: subnets.into_iter().map(Into::into).collect(),
            security_groups: security_groups.into_iter().map(Into::into).collect(),
            assign_public_ip: false,
        }
    }
}

/// Per-family network policies with a shared default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyTable {
    /// Policy for families without an entry.
    #[serde(default)]
    pub default: NetworkPolicy,
    /// Family-specific overrides.
    #[serde(default)]
    pub families: BTreeMap<String, NetworkPolicy>,
}

impl NetworkPolicyTable {
    /// Creates a table with only a default policy.
    pub fn new(default: NetworkPolicy) -> Self {
        Self {
            default,
            families: BTreeMap::new(),
        }
    }

    /// Adds a family-specific policy.
    pub fn with_family(mut self, family: impl Into<String>, policy: NetworkPolicy) -> Self {
        self.families.insert(family.into(), policy);
        self
    }

    /// The policy for a family.
    pub fn lookup(&self, family: &str) -> &NetworkPolicy {
        self.families.get(family).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_default() {
        let table = NetworkPolicyTable::new(NetworkPolicy::new(
            ["subnet-a", "subnet-b"],
            ["sg-general"],
        ))
        .with_family("essim", NetworkPolicy::new(["subnet-a"], ["sg-essim"]));

        assert_eq!(table.lookup("essim").subnets, vec!["subnet-a"]);
        assert_eq!(table.lookup("essim").security_groups, vec!["sg-essim"]);
        assert_eq!(table.lookup("loadflow").subnets.len(), 2);
        assert_eq!(table.lookup("loadflow").security_groups, vec!["sg-general"]);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
default:
  subnets: [subnet-a]
  security_groups: [sg-general]
families:
  essim:
    subnets: [subnet-influx]
    security_groups: [sg-essim]
  loadflow:
    assign_public_ip: true
"#;
        let table: NetworkPolicyTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.lookup("essim").subnets, vec!["subnet-influx"]);
        assert!(!table.lookup("essim").assign_public_ip);
        assert!(table.lookup("loadflow").assign_public_ip);
        assert_eq!(table.lookup("other").security_groups, vec!["sg-general"]);
    }
}
