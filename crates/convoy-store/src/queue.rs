//! The job queue and booking ledger contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use convoy_core::job::{JobResult, JobRun, LogLine, SpawnInfo, StepStatus};
use convoy_core::requirement::CapabilityProfile;
use convoy_core::{HatcheryId, JobId, Result, WorkerId};

/// Queue-side operations over job records.
///
/// The queue holds no storage of its own: listing is a filtered, ordered
/// view over the job records, and booking is a transient annotation on
/// them. Implementations must make `book`, `take`, `report_result`, and
/// `stop` single conditional updates on the job's current status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Publish a job. Called by the run controller when graph evaluation
    /// produces runnable work.
    async fn enqueue(&self, job: JobRun) -> Result<JobRun>;

    async fn job(&self, id: JobId) -> Result<JobRun>;

    /// All `Waiting` jobs whose requirement set the caller's profile
    /// satisfies, oldest first. Lease-expired bookings are returned to
    /// `Waiting` on the way through.
    async fn list_pending(
        &self,
        profile: &CapabilityProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRun>>;

    /// Exclusive, time-bounded reservation of a job by a hatchery.
    ///
    /// Errors with [`convoy_core::Error::AlreadyBooked`] while another
    /// hatchery holds a live lease, and with
    /// [`convoy_core::Error::JobNotWaiting`] once the job left the
    /// `Waiting`/`Booked` window. Re-booking by the current holder
    /// refreshes its lease.
    async fn book(
        &self,
        job_id: JobId,
        hatchery_id: HatcheryId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobRun>;

    /// Actively return a booked job to the pool. Only the booking hatchery
    /// may release; used when provisioning fails after a successful book.
    async fn release(&self, job_id: JobId, hatchery_id: HatcheryId) -> Result<()>;

    /// Claim a job for a worker, the at-most-once transition to `Building`.
    ///
    /// Succeeds iff the job is `Waiting`, or `Booked` with a lapsed lease,
    /// or `Booked` by the hatchery that spawned this worker. Exactly one of
    /// N concurrent callers wins; the rest get
    /// [`convoy_core::Error::JobNotWaiting`].
    async fn take(&self, job_id: JobId, worker_id: WorkerId, now: DateTime<Utc>) -> Result<JobRun>;

    /// Terminal transition reported by the owning worker.
    async fn report_result(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        result: JobResult,
    ) -> Result<JobRun>;

    /// Explicit cancellation. Legal from `Waiting`, `Booked`, and
    /// `Building`; workers poll for it between steps.
    async fn stop(&self, job_id: JobId) -> Result<JobRun>;

    /// Append one ordered log line for the job.
    async fn append_log(&self, job_id: JobId, line: LogLine) -> Result<()>;

    async fn logs(&self, job_id: JobId) -> Result<Vec<LogLine>>;

    async fn set_step_status(&self, job_id: JobId, status: StepStatus) -> Result<()>;

    async fn step_statuses(&self, job_id: JobId) -> Result<Vec<StepStatus>>;

    /// Append a provisioning audit entry. Append-only, success and failure
    /// alike.
    async fn add_spawn_info(&self, job_id: JobId, info: SpawnInfo) -> Result<()>;

    async fn spawn_infos(&self, job_id: JobId) -> Result<Vec<SpawnInfo>>;

    /// Jobs still `Waiting` after `older_than`. Unmatchable jobs wait
    /// forever by design; this surfaces them to operators instead of
    /// inventing a scheduling deadline.
    async fn stale_pending(&self, older_than: Duration, now: DateTime<Utc>) -> Result<Vec<JobRun>>;
}
