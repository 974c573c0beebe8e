//! Worker fleet control.
//!
//! The autoscaler talks to the orchestration backend through
//! [`FleetController`]: it counts running tasks of a family (aggregating
//! across pages) and starts new ones under the family's network policy.

pub mod docker;
pub mod policy;

use async_trait::async_trait;

use crate::error::FleetError;

pub use docker::DockerFleet;
pub use policy::{NetworkPolicy, NetworkPolicyTable};

/// One page of a running-task listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPage {
    /// Task handles on this page.
    pub handles: Vec<String>,
    /// Token of the next page, `None` on the last page.
    pub next_token: Option<String>,
}

impl TaskPage {
    /// A final page holding `handles`.
    pub fn last(handles: Vec<String>) -> Self {
        Self {
            handles,
            next_token: None,
        }
    }
}

/// Orchestration backend running worker tasks.
#[async_trait]
pub trait FleetController: Send + Sync {
    /// Lists one page of running tasks of a family.
    async fn list_running_page(
        &self,
        cluster: &str,
        family: &str,
        page_token: Option<&str>,
    ) -> Result<TaskPage, FleetError>;

    /// Counts running tasks of a family across all pages.
    async fn count_running(&self, cluster: &str, family: &str) -> Result<u64, FleetError> {
        let mut total = 0u64;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_running_page(cluster, family, token.as_deref())
                .await?;
            total += page.handles.len() as u64;
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(total),
            }
        }
    }

    /// Starts `count` tasks of a family. `count` never exceeds the
    /// backend's batch limit. Returns the number of tasks accepted.
    async fn start_tasks(
        &self,
        cluster: &str,
        family: &str,
        task_definition: &str,
        count: usize,
        policy: &NetworkPolicy,
    ) -> Result<usize, FleetError>;
}
