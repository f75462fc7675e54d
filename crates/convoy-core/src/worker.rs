//! Worker and hatchery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{HatcheryId, JobId, WorkerId};
use crate::requirement::{Capability, CapabilityProfile};

/// An ephemeral execution agent. Created at registration, reclaimed when its
/// job reaches a terminal state or its heartbeats stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    /// The token value this identity is bound to.
    pub token: String,
    pub profile: CapabilityProfile,
    pub group: String,
    /// The hatchery that spawned this worker, if any. Grants the booked-job
    /// take path.
    pub hatchery_id: Option<HatcheryId>,
    /// The job this worker is building. At most one, ever.
    pub job_id: Option<JobId>,
    pub registered_at: DateTime<Utc>,
    pub last_beat: DateTime<Utc>,
}

/// What a worker presents when it registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub name: String,
    pub token: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// What a worker presents when it takes a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeForm {
    /// The job a hatchery booked for this worker, when it was spawned for
    /// one. Workers may also take any eligible job off a queue listing.
    pub booked_job_id: Option<JobId>,
    pub time: DateTime<Utc>,
}

/// A long-lived provisioning agent for one compute backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hatchery {
    pub id: HatcheryId,
    pub name: String,
    pub token: String,
    pub group: String,
    /// Maximum number of concurrently provisioned workers.
    pub max_workers: u32,
    pub registered_at: DateTime<Utc>,
    pub last_beat: DateTime<Utc>,
}

/// What a hatchery presents when it registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HatcheryForm {
    pub name: String,
    pub token: String,
    pub max_workers: u32,
}
