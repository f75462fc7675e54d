//! Registration tokens for workers and hatcheries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::id::{HatcheryId, JobId, WorkerId};

/// How many registrations a token is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Consumed by the first worker that registers with it. Hatcheries mint
    /// these for the workers they spawn.
    SingleUse,
    /// Group-shared; any number of workers may register with it.
    Persistent,
}

/// A registration token and what it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub value: String,
    pub group: String,
    pub scope: TokenScope,
    /// Set when a hatchery minted this token for a worker it spawns; the
    /// worker inherits the hatchery identity at registration.
    pub hatchery_id: Option<HatcheryId>,
    /// Set when the token is scoped to a specific booking.
    pub job_id: Option<JobId>,
    pub consumed_by: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
}

impl RegistrationToken {
    pub fn new(group: impl Into<String>, scope: TokenScope) -> Self {
        Self {
            value: generate_token_value(),
            group: group.into(),
            scope,
            hatchery_id: None,
            job_id: None,
            consumed_by: None,
            created_at: Utc::now(),
        }
    }

    /// A single-use token bound to the hatchery that spawns the worker and,
    /// when present, to the booking the worker is being spawned for.
    pub fn for_spawn(
        group: impl Into<String>,
        hatchery_id: HatcheryId,
        job_id: Option<JobId>,
    ) -> Self {
        Self {
            hatchery_id: Some(hatchery_id),
            job_id,
            ..Self::new(group, TokenScope::SingleUse)
        }
    }
}

/// 64 hex chars of entropy; the value is the identity, nothing is derived
/// back out of it.
pub fn generate_token_value() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}
