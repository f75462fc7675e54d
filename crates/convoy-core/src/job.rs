//! The job record and the payloads workers report against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{HatcheryId, JobId, NodeRunId, WorkerId};
use crate::requirement::Requirement;
use crate::status::JobStatus;

/// One schedulable unit of pipeline work.
///
/// A job belongs to exactly one node-run and never has two workers assigned
/// at once. The `booked_by`/`book_deadline` pair only exists inside the
/// `Waiting → Booked` window; it is cleared when the job is taken or the
/// lease lapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobId,
    pub node_run_id: NodeRunId,
    pub requirements: Vec<Requirement>,
    pub steps: Vec<Step>,
    pub status: JobStatus,
    pub booked_by: Option<HatcheryId>,
    pub book_deadline: Option<DateTime<Utc>>,
    pub worker_id: Option<WorkerId>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(node_run_id: NodeRunId, requirements: Vec<Requirement>, steps: Vec<Step>) -> Self {
        Self {
            id: JobId::new(),
            node_run_id,
            requirements,
            steps,
            status: JobStatus::Waiting,
            booked_by: None,
            book_deadline: None,
            worker_id: None,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// One executable step of a job. The run controller fills these in when it
/// turns a pipeline definition into jobs; the queue treats them as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub script: String,
}

impl Step {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
        }
    }
}

/// Terminal result a worker reports for its job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub duration_ms: i64,
    pub remote_time: DateTime<Utc>,
}

/// One ordered log line, tied to the step that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub step_order: i32,
    pub at: DateTime<Utc>,
    pub value: String,
}

impl LogLine {
    pub fn new(step_order: i32, value: impl Into<String>) -> Self {
        Self {
            step_order,
            at: Utc::now(),
            value: value.into(),
        }
    }
}

/// Per-step status update reported while a job is building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    pub step_order: i32,
    pub status: JobStatus,
}

/// Append-only audit entry describing one provisioning attempt for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnInfo {
    pub hatchery_id: HatcheryId,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SpawnInfo {
    pub fn now(hatchery_id: HatcheryId, message: impl Into<String>) -> Self {
        Self {
            hatchery_id,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// A shared variable, visible to later jobs of the same node-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}
