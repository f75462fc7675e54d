//! Job lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a job in the queue.
///
/// The legal sequence is `Waiting → Booked → Building → {Success, Fail,
/// Stopped}`, where `Booked` may revert to `Waiting` when its lease expires
/// and `Building` may be skipped into directly from `Waiting` by an unbooked
/// take. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Booked,
    Building,
    Success,
    Fail,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Fail | JobStatus::Stopped)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Waiting, Booked)
                | (Waiting, Building)
                | (Waiting, Stopped)
                | (Booked, Waiting)
                | (Booked, Building)
                | (Booked, Stopped)
                | (Building, Success)
                | (Building, Fail)
                | (Building, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "Waiting",
            JobStatus::Booked => "Booked",
            JobStatus::Building => "Building",
            JobStatus::Success => "Success",
            JobStatus::Fail => "Fail",
            JobStatus::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Waiting" => Ok(JobStatus::Waiting),
            "Booked" => Ok(JobStatus::Booked),
            "Building" => Ok(JobStatus::Building),
            "Success" => Ok(JobStatus::Success),
            "Fail" => Ok(JobStatus::Fail),
            "Stopped" => Ok(JobStatus::Stopped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Lease and heartbeat deadlines share one expiry rule. Both the lazy
/// on-access checks and the optional periodic sweeps go through here, so
/// correctness never depends on the sweep running.
pub fn expired(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline <= now
}
