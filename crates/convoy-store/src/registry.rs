//! Worker, hatchery, and token registries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use convoy_core::token::RegistrationToken;
use convoy_core::worker::{Hatchery, HatcheryForm, RegistrationForm, Worker};
use convoy_core::{HatcheryId, JobId, Result, WorkerId};

/// Identity bookkeeping for the processes that talk to the queue.
///
/// Token issuance itself is an external collaborator; the registry only
/// stores issued tokens and binds identities to them.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn add_token(&self, token: RegistrationToken) -> Result<()>;

    /// Look up an issued token. Group-scoped callers (human users reading
    /// artifacts) are resolved through this.
    async fn token(&self, value: &str) -> Result<RegistrationToken>;

    /// Create a worker identity bound to a token. Single-use tokens are
    /// consumed atomically — a second registration against one fails with
    /// [`convoy_core::Error::InvalidToken`], as does an unknown token.
    /// Returns the worker plus the job its token was booked for, if any.
    async fn register_worker(
        &self,
        form: RegistrationForm,
        now: DateTime<Utc>,
    ) -> Result<(Worker, Option<JobId>)>;

    async fn worker(&self, id: WorkerId) -> Result<Worker>;

    /// Resolve a caller's worker identity from its bearer token.
    async fn worker_by_token(&self, token: &str) -> Result<Worker>;

    async fn worker_heartbeat(&self, id: WorkerId, now: DateTime<Utc>) -> Result<()>;

    /// Reclaim a worker entity once its job is terminal.
    async fn remove_worker(&self, id: WorkerId) -> Result<()>;

    async fn register_hatchery(&self, form: HatcheryForm, now: DateTime<Utc>) -> Result<Hatchery>;

    async fn hatchery(&self, id: HatcheryId) -> Result<Hatchery>;

    /// Resolve a caller's hatchery identity from its bearer token.
    async fn hatchery_by_token(&self, token: &str) -> Result<Hatchery>;

    async fn hatchery_heartbeat(&self, id: HatcheryId, now: DateTime<Utc>) -> Result<()>;

    /// Workers silent for longer than `timeout` are lost: their `Building`
    /// job is forced to `Fail` — the one terminal transition not reported
    /// by the owner — and the worker entity is reclaimed. Returns the
    /// reclaimed worker ids. Called lazily from the hatchery loop; running
    /// it more often is an optimization, never a correctness requirement.
    async fn reap_lost_workers(&self, timeout: Duration, now: DateTime<Utc>)
    -> Result<Vec<WorkerId>>;
}
