//! Local-process driver, for development and single-host deployments.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use convoy_core::driver::{ComputeDriver, Instance, WorkerSpec};
use convoy_core::requirement::CapabilityProfile;
use convoy_core::{Error, Result};

/// Spawns worker binaries as child processes of the hatchery.
pub struct LocalDriver {
    worker_binary: PathBuf,
    profile: CapabilityProfile,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalDriver {
    pub fn new(worker_binary: impl Into<PathBuf>, profile: CapabilityProfile) -> Self {
        Self {
            worker_binary: worker_binary.into(),
            profile,
            children: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ComputeDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn profile(&self) -> CapabilityProfile {
        self.profile.clone()
    }

    async fn spawn(&self, spec: WorkerSpec) -> Result<Instance> {
        let mut command = Command::new(&self.worker_binary);
        command
            .env("CONVOY_WORKER_NAME", &spec.name)
            .env("CONVOY_WORKER_TOKEN", &spec.registration_token)
            .env("CONVOY_WORKER_MODEL", &spec.model)
            .kill_on_drop(true);
        if let Some(job_id) = spec.job_id {
            command.env("CONVOY_BOOKED_JOB", job_id.to_string());
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = command
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("exec {}: {e}", self.worker_binary.display())))?;
        let pid = child.id().unwrap_or_default();
        info!(worker = %spec.name, pid, "spawned local worker");

        let instance = Instance {
            handle: pid.to_string(),
            worker_name: spec.name.clone(),
            launched_at: Utc::now(),
        };
        self.children.lock().await.insert(spec.name, child);
        Ok(instance)
    }

    async fn terminate(&self, instance: &Instance) -> Result<()> {
        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(&instance.worker_name) {
            debug!(worker = %instance.worker_name, "killing local worker");
            child
                .kill()
                .await
                .map_err(|e| Error::Internal(format!("kill {}: {e}", instance.worker_name)))?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let children = self.children.lock().await;
        Ok(children
            .iter()
            .map(|(name, child)| Instance {
                handle: child.id().unwrap_or_default().to_string(),
                worker_name: name.clone(),
                launched_at: Utc::now(),
            })
            .collect())
    }
}
