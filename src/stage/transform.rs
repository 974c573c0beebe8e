//! The capability a stage delegates its domain computation to.

use async_trait::async_trait;

use crate::error::TransformError;
use crate::scenario::{ArtifactRefs, Scenario};

/// An external stage computation.
///
/// Receives the scenario snapshot (including its artifact references) and
/// returns the artifact references it produced. Must be safe to run twice
/// for the same input: queue delivery is at-least-once.
#[async_trait]
pub trait StageTransform: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the computation for one scenario.
    async fn apply(&self, scenario: &Scenario) -> Result<ArtifactRefs, TransformError>;
}

/// A transform that produces nothing. Used by pure fan-out stages.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTransform;

#[async_trait]
impl StageTransform for PassthroughTransform {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn apply(&self, _scenario: &Scenario) -> Result<ArtifactRefs, TransformError> {
        Ok(ArtifactRefs::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_produces_no_artifacts() {
        let scenario = Scenario::new(1, "essimExported", "b/").with_artifact("a", "b/a");
        let refs = PassthroughTransform.apply(&scenario).await.unwrap();
        assert!(refs.is_empty());
        assert_eq!(PassthroughTransform.name(), "passthrough");
    }
}
