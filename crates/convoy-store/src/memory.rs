//! In-memory store, used by tests and single-process deployments.
//!
//! One mutex guards the whole state. Every conditional transition checks
//! and mutates inside the same guard, which makes it the in-process
//! equivalent of the conditional `UPDATE` the PostgreSQL store runs: two
//! racing `take` calls serialize on the lock and the second one observes
//! the already-changed status.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use convoy_core::job::{JobResult, JobRun, LogLine, SpawnInfo, StepStatus, Variable};
use convoy_core::report::TestReport;
use convoy_core::requirement::CapabilityProfile;
use convoy_core::token::{RegistrationToken, TokenScope};
use convoy_core::worker::{Hatchery, HatcheryForm, RegistrationForm, Worker};
use convoy_core::{
    ArtifactId, Error, HatcheryId, JobId, JobStatus, NodeRunId, Result, WorkerId, expired,
};
use convoy_core::artifact::Artifact;

use crate::ingest::IngestStore;
use crate::queue::JobStore;
use crate::registry::RegistryStore;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRun>,
    logs: HashMap<JobId, Vec<LogLine>>,
    step_statuses: HashMap<JobId, Vec<StepStatus>>,
    spawn_infos: HashMap<JobId, Vec<SpawnInfo>>,
    tokens: HashMap<String, RegistrationToken>,
    workers: HashMap<WorkerId, Worker>,
    hatcheries: HashMap<HatcheryId, Hatchery>,
    artifacts: HashMap<ArtifactId, Artifact>,
    reports: HashMap<NodeRunId, TestReport>,
    variables: HashMap<NodeRunId, Vec<Variable>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation; nothing to salvage.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lazily return a lease-expired booking to the pool.
fn release_expired(job: &mut JobRun, now: DateTime<Utc>) {
    if job.status == JobStatus::Booked
        && job.book_deadline.is_some_and(|deadline| expired(deadline, now))
    {
        job.status = JobStatus::Waiting;
        job.booked_by = None;
        job.book_deadline = None;
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: JobRun) -> Result<JobRun> {
        let mut inner = self.lock();
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn job(&self, id: JobId) -> Result<JobRun> {
        let inner = self.lock();
        inner
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    async fn list_pending(
        &self,
        profile: &CapabilityProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRun>> {
        let mut inner = self.lock();
        let mut pending: Vec<JobRun> = inner
            .jobs
            .values_mut()
            .filter_map(|job| {
                release_expired(job, now);
                (job.status == JobStatus::Waiting && profile.satisfies_all(&job.requirements))
                    .then(|| job.clone())
            })
            .collect();
        pending.sort_by_key(|job| job.queued_at);
        Ok(pending)
    }

    async fn book(
        &self,
        job_id: JobId,
        hatchery_id: HatcheryId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobRun> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        release_expired(job, now);
        match job.status {
            JobStatus::Waiting => {
                job.status = JobStatus::Booked;
                job.booked_by = Some(hatchery_id);
                job.book_deadline = Some(now + lease);
                Ok(job.clone())
            }
            JobStatus::Booked if job.booked_by == Some(hatchery_id) => {
                // Lease refresh by the holder.
                job.book_deadline = Some(now + lease);
                Ok(job.clone())
            }
            JobStatus::Booked => Err(Error::AlreadyBooked),
            _ => Err(Error::JobNotWaiting),
        }
    }

    async fn release(&self, job_id: JobId, hatchery_id: HatcheryId) -> Result<()> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Booked {
            return Err(Error::JobNotWaiting);
        }
        if job.booked_by != Some(hatchery_id) {
            return Err(Error::Forbidden("booking held by another hatchery".to_string()));
        }
        job.status = JobStatus::Waiting;
        job.booked_by = None;
        job.book_deadline = None;
        Ok(())
    }

    async fn take(&self, job_id: JobId, worker_id: WorkerId, now: DateTime<Utc>) -> Result<JobRun> {
        let mut inner = self.lock();
        let spawned_by = inner
            .workers
            .get(&worker_id)
            .ok_or_else(|| Error::NotFound(format!("worker {worker_id}")))?
            .hatchery_id;

        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        release_expired(job, now);
        match job.status {
            JobStatus::Waiting => {}
            JobStatus::Booked if spawned_by.is_some() && job.booked_by == spawned_by => {}
            _ => return Err(Error::JobNotWaiting),
        }
        job.status = JobStatus::Building;
        job.worker_id = Some(worker_id);
        job.started_at = Some(now);
        job.booked_by = None;
        job.book_deadline = None;
        let taken = job.clone();

        if let Some(worker) = inner.workers.get_mut(&worker_id) {
            worker.job_id = Some(job_id);
        }
        Ok(taken)
    }

    async fn report_result(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        result: JobResult,
    ) -> Result<JobRun> {
        if !result.status.is_terminal() {
            return Err(Error::Internal(format!(
                "reported result status {} is not terminal",
                result.status
            )));
        }
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if job.worker_id != Some(worker_id) {
            return Err(Error::Forbidden("job is owned by another worker".to_string()));
        }
        if !job.status.can_transition(result.status) {
            return Err(Error::JobNotWaiting);
        }
        job.status = result.status;
        job.ended_at = Some(result.remote_time);
        let finished = job.clone();

        // The worker is done; reclaim it.
        inner.workers.remove(&worker_id);
        Ok(finished)
    }

    async fn stop(&self, job_id: JobId) -> Result<JobRun> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if !job.status.can_transition(JobStatus::Stopped) {
            return Err(Error::JobNotWaiting);
        }
        job.status = JobStatus::Stopped;
        job.ended_at = Some(Utc::now());
        job.booked_by = None;
        job.book_deadline = None;
        Ok(job.clone())
    }

    async fn append_log(&self, job_id: JobId, line: LogLine) -> Result<()> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&job_id) {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        inner.logs.entry(job_id).or_default().push(line);
        Ok(())
    }

    async fn logs(&self, job_id: JobId) -> Result<Vec<LogLine>> {
        let inner = self.lock();
        Ok(inner.logs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn set_step_status(&self, job_id: JobId, status: StepStatus) -> Result<()> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&job_id) {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        let statuses = inner.step_statuses.entry(job_id).or_default();
        match statuses.iter_mut().find(|s| s.step_order == status.step_order) {
            Some(existing) => existing.status = status.status,
            None => statuses.push(status),
        }
        Ok(())
    }

    async fn step_statuses(&self, job_id: JobId) -> Result<Vec<StepStatus>> {
        let inner = self.lock();
        Ok(inner.step_statuses.get(&job_id).cloned().unwrap_or_default())
    }

    async fn add_spawn_info(&self, job_id: JobId, info: SpawnInfo) -> Result<()> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&job_id) {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        inner.spawn_infos.entry(job_id).or_default().push(info);
        Ok(())
    }

    async fn spawn_infos(&self, job_id: JobId) -> Result<Vec<SpawnInfo>> {
        let inner = self.lock();
        Ok(inner.spawn_infos.get(&job_id).cloned().unwrap_or_default())
    }

    async fn stale_pending(&self, older_than: Duration, now: DateTime<Utc>) -> Result<Vec<JobRun>> {
        let inner = self.lock();
        let mut stale: Vec<JobRun> = inner
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Waiting && expired(job.queued_at + older_than, now)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.queued_at);
        Ok(stale)
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn add_token(&self, token: RegistrationToken) -> Result<()> {
        let mut inner = self.lock();
        inner.tokens.insert(token.value.clone(), token);
        Ok(())
    }

    async fn token(&self, value: &str) -> Result<RegistrationToken> {
        let inner = self.lock();
        inner.tokens.get(value).cloned().ok_or(Error::InvalidToken)
    }

    async fn register_worker(
        &self,
        form: RegistrationForm,
        now: DateTime<Utc>,
    ) -> Result<(Worker, Option<JobId>)> {
        let mut inner = self.lock();
        let worker_id = WorkerId::new();
        let (group, hatchery_id, job_id) = {
            let token = inner.tokens.get_mut(&form.token).ok_or(Error::InvalidToken)?;
            if token.scope == TokenScope::SingleUse && token.consumed_by.is_some() {
                return Err(Error::InvalidToken);
            }
            if token.scope == TokenScope::SingleUse {
                token.consumed_by = Some(worker_id);
            }
            (token.group.clone(), token.hatchery_id, token.job_id)
        };

        let worker = Worker {
            id: worker_id,
            name: form.name,
            token: form.token,
            profile: CapabilityProfile::new(form.model, form.capabilities),
            group,
            hatchery_id,
            job_id: None,
            registered_at: now,
            last_beat: now,
        };
        inner.workers.insert(worker.id, worker.clone());
        Ok((worker, job_id))
    }

    async fn worker(&self, id: WorkerId) -> Result<Worker> {
        let inner = self.lock();
        inner
            .workers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))
    }

    async fn worker_by_token(&self, token: &str) -> Result<Worker> {
        let inner = self.lock();
        inner
            .workers
            .values()
            .find(|w| w.token == token)
            .cloned()
            .ok_or(Error::InvalidToken)
    }

    async fn worker_heartbeat(&self, id: WorkerId, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        let worker = inner
            .workers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        worker.last_beat = now;
        Ok(())
    }

    async fn remove_worker(&self, id: WorkerId) -> Result<()> {
        let mut inner = self.lock();
        inner.workers.remove(&id);
        Ok(())
    }

    async fn register_hatchery(&self, form: HatcheryForm, now: DateTime<Utc>) -> Result<Hatchery> {
        let mut inner = self.lock();
        let group = {
            let token = inner.tokens.get(&form.token).ok_or(Error::InvalidToken)?;
            token.group.clone()
        };
        let hatchery = Hatchery {
            id: HatcheryId::new(),
            name: form.name,
            token: form.token,
            group,
            max_workers: form.max_workers,
            registered_at: now,
            last_beat: now,
        };
        inner.hatcheries.insert(hatchery.id, hatchery.clone());
        Ok(hatchery)
    }

    async fn hatchery(&self, id: HatcheryId) -> Result<Hatchery> {
        let inner = self.lock();
        inner
            .hatcheries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("hatchery {id}")))
    }

    async fn hatchery_by_token(&self, token: &str) -> Result<Hatchery> {
        let inner = self.lock();
        inner
            .hatcheries
            .values()
            .find(|h| h.token == token)
            .cloned()
            .ok_or(Error::InvalidToken)
    }

    async fn hatchery_heartbeat(&self, id: HatcheryId, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        let hatchery = inner
            .hatcheries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("hatchery {id}")))?;
        hatchery.last_beat = now;
        Ok(())
    }

    async fn reap_lost_workers(
        &self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>> {
        let mut inner = self.lock();
        let lost: Vec<(WorkerId, String, Option<JobId>)> = inner
            .workers
            .values()
            .filter(|w| expired(w.last_beat + timeout, now))
            .map(|w| (w.id, w.name.clone(), w.job_id))
            .collect();

        let mut reclaimed = Vec::with_capacity(lost.len());
        for (worker_id, worker_name, job_id) in lost {
            if let Some(job_id) = job_id {
                let failed = match inner.jobs.get_mut(&job_id) {
                    Some(job)
                        if job.status == JobStatus::Building
                            && job.worker_id == Some(worker_id) =>
                    {
                        job.status = JobStatus::Fail;
                        job.ended_at = Some(now);
                        true
                    }
                    _ => false,
                };
                if failed {
                    inner.logs.entry(job_id).or_default().push(LogLine {
                        step_order: 0,
                        at: now,
                        value: format!("worker {worker_name} lost (heartbeat timeout), job failed"),
                    });
                }
            }
            inner.workers.remove(&worker_id);
            reclaimed.push(worker_id);
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn store_artifact(&self, artifact: Artifact) -> Result<Artifact> {
        let mut inner = self.lock();
        inner.artifacts.insert(artifact.id, artifact.clone());
        Ok(artifact)
    }

    async fn artifacts(&self, node_run_id: NodeRunId) -> Result<Vec<Artifact>> {
        let inner = self.lock();
        let mut artifacts: Vec<Artifact> = inner
            .artifacts
            .values()
            .filter(|a| a.node_run_id == node_run_id)
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }

    async fn artifact(&self, id: ArtifactId) -> Result<Artifact> {
        let inner = self.lock();
        inner
            .artifacts
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {id}")))
    }

    async fn store_test_report(
        &self,
        node_run_id: NodeRunId,
        mut report: TestReport,
    ) -> Result<TestReport> {
        report.recompute();
        let mut inner = self.lock();
        inner.reports.insert(node_run_id, report.clone());
        Ok(report)
    }

    async fn test_report(&self, node_run_id: NodeRunId) -> Result<Option<TestReport>> {
        let inner = self.lock();
        Ok(inner.reports.get(&node_run_id).cloned())
    }

    async fn set_variable(&self, node_run_id: NodeRunId, variable: Variable) -> Result<()> {
        let mut inner = self.lock();
        let variables = inner.variables.entry(node_run_id).or_default();
        match variables.iter_mut().find(|v| v.name == variable.name) {
            Some(existing) => existing.value = variable.value,
            None => variables.push(variable),
        }
        Ok(())
    }

    async fn variables(&self, node_run_id: NodeRunId) -> Result<Vec<Variable>> {
        let inner = self.lock();
        Ok(inner.variables.get(&node_run_id).cloned().unwrap_or_default())
    }
}
