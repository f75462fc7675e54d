//! The compute-driver trait hatcheries provision workers through.
//!
//! Drivers run worker instances on one backend (local process, Docker,
//! Kubernetes, a cloud VM API). The pool-control loop is written once
//! against this trait and never encodes backend specifics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::id::JobId;
use crate::requirement::CapabilityProfile;

/// Everything a driver needs to boot one worker: the single-use token the
/// worker will register with and the environment it starts in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub registration_token: String,
    pub model: String,
    /// The booking this worker is spawned for, when there is one.
    pub job_id: Option<JobId>,
    pub env: HashMap<String, String>,
}

/// Handle to a provisioned instance, opaque to everything but its driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Driver-specific identifier (pid, container id, k8s job name, ...).
    pub handle: String,
    pub worker_name: String,
    pub launched_at: DateTime<Utc>,
}

/// One compute backend's provisioning surface.
#[async_trait]
pub trait ComputeDriver: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// The capability profile of the workers this backend produces; the
    /// pool controller matches pending jobs against it.
    fn profile(&self) -> CapabilityProfile;

    /// Provision one worker instance.
    async fn spawn(&self, spec: WorkerSpec) -> Result<Instance>;

    /// Tear an instance down.
    async fn terminate(&self, instance: &Instance) -> Result<()>;

    /// Instances this driver currently has alive.
    async fn list(&self) -> Result<Vec<Instance>>;
}
