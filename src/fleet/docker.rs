//! Docker-backed fleet using the bollard crate.
//!
//! A task is a container carrying the labels `gridflow.cluster` and
//! `gridflow.family`. The image is the pool's task definition, the first
//! policy subnet is used as the Docker network, and security groups are
//! recorded on the container as a label. A policy asking for a public
//! address publishes every exposed port on the host.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{FleetController, NetworkPolicy, TaskPage};
use crate::error::FleetError;

/// Label holding the cluster name.
pub const CLUSTER_LABEL: &str = "gridflow.cluster";
/// Label holding the pool family.
pub const FAMILY_LABEL: &str = "gridflow.family";
/// Label holding the comma-separated security groups.
pub const SECURITY_GROUPS_LABEL: &str = "gridflow.security_groups";

/// Fleet controller running tasks as local Docker containers.
pub struct DockerFleet {
    docker: Docker,
    batch_limit: usize,
}

impl DockerFleet {
    /// Connects to the local Docker daemon.
    pub fn connect(batch_limit: usize) -> Result<Self, FleetError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| FleetError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::from_docker(docker, batch_limit))
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker, batch_limit: usize) -> Self {
        Self {
            docker,
            batch_limit,
        }
    }

    fn labels(cluster: &str, family: &str, policy: &NetworkPolicy) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        labels.insert(FAMILY_LABEL.to_string(), family.to_string());
        if !policy.security_groups.is_empty() {
            labels.insert(
                SECURITY_GROUPS_LABEL.to_string(),
                policy.security_groups.join(","),
            );
        }
        labels
    }

    fn host_config(policy: &NetworkPolicy) -> HostConfig {
        HostConfig {
            network_mode: policy.subnets.first().cloned(),
            publish_all_ports: Some(policy.assign_public_ip),
            ..Default::default()
        }
    }

    fn container_name(cluster: &str, family: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", cluster, family, &suffix[..12])
    }

    async fn start_one(
        &self,
        cluster: &str,
        family: &str,
        task_definition: &str,
        policy: &NetworkPolicy,
    ) -> Result<String, FleetError> {
        let config = Config {
            image: Some(task_definition.to_string()),
            env: Some(vec![
                format!("GRIDFLOW_CLUSTER={}", cluster),
                format!("GRIDFLOW_FAMILY={}", family),
            ]),
            labels: Some(Self::labels(cluster, family, policy)),
            host_config: Some(Self::host_config(policy)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Self::container_name(cluster, family),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| FleetError::Rejected {
                family: family.to_string(),
                count: 1,
                reason: format!("Failed to create container: {e}"),
            })?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| FleetError::Rejected {
                family: family.to_string(),
                count: 1,
                reason: format!("Failed to start container: {e}"),
            })?;

        debug!(container = %response.id, family = %family, "Started task container");
        Ok(response.id)
    }
}

#[async_trait]
impl FleetController for DockerFleet {
    async fn list_running_page(
        &self,
        cluster: &str,
        family: &str,
        _page_token: Option<&str>,
    ) -> Result<TaskPage, FleetError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![
                format!("{}={}", CLUSTER_LABEL, cluster),
                format!("{}={}", FAMILY_LABEL, family),
            ],
        );
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let options = ListContainersOptions {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| FleetError::ListFailed {
                family: family.to_string(),
                reason: e.to_string(),
            })?;

        // The Docker API returns everything in one page
        Ok(TaskPage::last(
            containers.into_iter().filter_map(|c| c.id).collect(),
        ))
    }

    async fn start_tasks(
        &self,
        cluster: &str,
        family: &str,
        task_definition: &str,
        count: usize,
        policy: &NetworkPolicy,
    ) -> Result<usize, FleetError> {
        if count > self.batch_limit {
            return Err(FleetError::BatchTooLarge {
                requested: count,
                limit: self.batch_limit,
            });
        }

        let mut started = 0;
        for _ in 0..count {
            match self.start_one(cluster, family, task_definition, policy).await {
                Ok(_) => started += 1,
                Err(e) if started > 0 => {
                    warn!(family = %family, started, requested = count, "Partial start: {}", e);
                    return Ok(started);
                }
                Err(e) => return Err(e),
            }
        }

        info!(family = %family, started, image = %task_definition, "Started task containers");
        Ok(started)
    }
}
