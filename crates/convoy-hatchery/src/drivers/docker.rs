//! Docker container driver.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use convoy_core::driver::{ComputeDriver, Instance, WorkerSpec};
use convoy_core::requirement::CapabilityProfile;
use convoy_core::{Error, Result};

/// Label stamped on every container this driver creates, so `list` only
/// sees its own workers.
const HATCHERY_LABEL: &str = "convoy.hatchery";

/// Runs workers as containers on a Docker daemon.
pub struct DockerDriver {
    docker: Docker,
    hatchery_name: String,
    /// Image the worker containers run.
    image: String,
    profile: CapabilityProfile,
}

impl DockerDriver {
    pub fn new(
        hatchery_name: impl Into<String>,
        image: impl Into<String>,
        profile: CapabilityProfile,
    ) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            docker,
            hatchery_name: hatchery_name.into(),
            image: image.into(),
            profile,
        })
    }

    pub fn with_client(
        docker: Docker,
        hatchery_name: impl Into<String>,
        image: impl Into<String>,
        profile: CapabilityProfile,
    ) -> Self {
        Self {
            docker,
            hatchery_name: hatchery_name.into(),
            image: image.into(),
            profile,
        }
    }

    async fn pull_image(&self) {
        let options = CreateImageOptions {
            from_image: self.image.clone(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => warn!(error = %e, "pull warning"),
            }
        }
    }
}

#[async_trait]
impl ComputeDriver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn profile(&self) -> CapabilityProfile {
        self.profile.clone()
    }

    async fn spawn(&self, spec: WorkerSpec) -> Result<Instance> {
        self.pull_image().await;

        let mut env: Vec<String> = vec![
            format!("CONVOY_WORKER_NAME={}", spec.name),
            format!("CONVOY_WORKER_TOKEN={}", spec.registration_token),
            format!("CONVOY_WORKER_MODEL={}", spec.model),
        ];
        if let Some(job_id) = spec.job_id {
            env.push(format!("CONVOY_BOOKED_JOB={job_id}"));
        }
        env.extend(spec.env.iter().map(|(k, v)| format!("{k}={v}")));

        let labels = HashMap::from([(HATCHERY_LABEL.to_string(), self.hatchery_name.clone())]);
        let config = Config {
            image: Some(self.image.clone()),
            env: Some(env),
            labels: Some(labels),
            tty: Some(false),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        info!(container = %spec.name, "creating worker container");
        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::SpawnFailed(format!("create container: {e}")))?;

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::SpawnFailed(format!("start container: {e}")))?;

        Ok(Instance {
            handle: container.id,
            worker_name: spec.name,
            launched_at: Utc::now(),
        })
    }

    async fn terminate(&self, instance: &Instance) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&instance.worker_name, Some(options))
            .await
            .map_err(|e| Error::Internal(format!("remove container: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{HATCHERY_LABEL}={}", self.hatchery_name)],
        )]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::Internal(format!("list containers: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| Instance {
                handle: c.id.unwrap_or_default(),
                worker_name: c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                launched_at: c
                    .created
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }
}
