//! The worker runtime session: register, claim, build, report.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use convoy_core::artifact::{Artifact, ObjectStore, content_checksum};
use convoy_core::job::{JobResult, JobRun, LogLine, StepStatus, Variable};
use convoy_core::report::TestReport;
use convoy_core::worker::{RegistrationForm, Worker};
use convoy_core::{JobId, JobStatus, Result};
use convoy_store::{Store, ingest_artifact};

use crate::runner::StepRunner;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// One worker's protocol session against the shared store.
pub struct Session {
    worker: Worker,
    booked_job: Option<JobId>,
    store: Arc<dyn Store>,
    runner: Arc<dyn StepRunner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("worker", &self.worker)
            .field("booked_job", &self.booked_job)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Register the worker identity. Fails with
    /// [`convoy_core::Error::InvalidToken`] when the token is unknown or
    /// already consumed.
    pub async fn register(
        store: Arc<dyn Store>,
        runner: Arc<dyn StepRunner>,
        form: RegistrationForm,
    ) -> Result<Self> {
        let (worker, booked_job) = store.register_worker(form, Utc::now()).await?;
        info!(worker = %worker.id, name = %worker.name, "registered");
        Ok(Self {
            worker,
            booked_job,
            store,
            runner,
        })
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn booked_job(&self) -> Option<JobId> {
        self.booked_job
    }

    /// Beat until the worker identity disappears (it is reclaimed when the
    /// job finishes or the heartbeat times out).
    pub fn start_heartbeat(&self, config: &SessionConfig) -> JoinHandle<()> {
        let store = self.store.clone();
        let worker_id = self.worker.id;
        let interval = config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if store.worker_heartbeat(worker_id, Utc::now()).await.is_err() {
                    debug!(worker = %worker_id, "heartbeat rejected, stopping");
                    break;
                }
            }
        })
    }

    /// Take the pre-booked job if there is one, otherwise poll the queue
    /// and take the first eligible job. `None` means nothing was claimable
    /// this round.
    pub async fn claim(&self) -> Result<Option<JobRun>> {
        if let Some(job_id) = self.booked_job {
            match self.store.take(job_id, self.worker.id, Utc::now()).await {
                Ok(job) => return Ok(Some(job)),
                // The booking lapsed or someone else got there; fall back
                // to the open queue.
                Err(e) if e.is_conflict() => {
                    debug!(job = %job_id, "booked job no longer takeable")
                }
                Err(e) => return Err(e),
            }
        }

        for job in self
            .store
            .list_pending(&self.worker.profile, Utc::now())
            .await?
        {
            match self.store.take(job.id, self.worker.id, Utc::now()).await {
                Ok(job) => return Ok(Some(job)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Execute a taken job step by step, reporting logs and per-step
    /// status, polling for a stop between steps, and finishing with the
    /// terminal result. Returns the terminal status.
    pub async fn build(&self, job: &JobRun) -> Result<JobStatus> {
        let started = Instant::now();
        let mut outcome = JobStatus::Success;

        for (order, step) in job.steps.iter().enumerate() {
            let order = order as i32;

            if self.store.job(job.id).await?.status == JobStatus::Stopped {
                info!(job = %job.id, "job stopped, abandoning remaining steps");
                outcome = JobStatus::Stopped;
                break;
            }

            self.store
                .set_step_status(
                    job.id,
                    StepStatus {
                        step_order: order,
                        status: JobStatus::Building,
                    },
                )
                .await?;

            let result = self.runner.run(step).await;
            let (step_status, output) = match result {
                Ok(run) if run.success => (JobStatus::Success, run.output),
                Ok(run) => (JobStatus::Fail, run.output),
                Err(e) => (JobStatus::Fail, format!("step {} errored: {e}", step.name)),
            };

            for line in output.lines() {
                self.store
                    .append_log(job.id, LogLine::new(order, line))
                    .await?;
            }
            self.store
                .set_step_status(
                    job.id,
                    StepStatus {
                        step_order: order,
                        status: step_status,
                    },
                )
                .await?;

            if step_status == JobStatus::Fail {
                outcome = JobStatus::Fail;
                break;
            }
        }

        if outcome == JobStatus::Stopped {
            // Stop is already terminal on the job; just hand the identity
            // back.
            self.store.remove_worker(self.worker.id).await?;
            return Ok(outcome);
        }

        self.store
            .report_result(
                job.id,
                self.worker.id,
                JobResult {
                    status: outcome,
                    duration_ms: started.elapsed().as_millis() as i64,
                    remote_time: Utc::now(),
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Claim and build one job. `None` when the queue had nothing for us.
    pub async fn run_once(&self) -> Result<Option<JobStatus>> {
        match self.claim().await? {
            Some(job) => {
                info!(job = %job.id, "took job");
                let status = self.build(&job).await?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Upload a full-replace test report for the job's node-run.
    pub async fn report_tests(&self, job: &JobRun, report: TestReport) -> Result<TestReport> {
        self.store.store_test_report(job.node_run_id, report).await
    }

    /// One-shot artifact upload with declared metadata.
    pub async fn upload_artifact(
        &self,
        job: &JobRun,
        objects: &dyn ObjectStore,
        name: &str,
        tag: &str,
        perm: u32,
        data: Bytes,
    ) -> Result<Artifact> {
        let size = data.len() as i64;
        let md5 = content_checksum(&data);
        ingest_artifact(
            self.store.as_ref(),
            objects,
            job.node_run_id,
            name,
            tag,
            size,
            &md5,
            perm,
            data,
        )
        .await
    }

    /// Set a shared variable visible to later jobs of the same run.
    pub async fn set_variable(&self, job: &JobRun, variable: Variable) -> Result<()> {
        self.store.set_variable(job.node_run_id, variable).await
    }

    /// Poll-claim-build until a job is processed or `attempts` polls come
    /// up empty.
    pub async fn run_until_done(&self, attempts: u32, idle: std::time::Duration) -> Result<Option<JobStatus>> {
        for _ in 0..attempts {
            if let Some(status) = self.run_once().await? {
                return Ok(Some(status));
            }
            tokio::time::sleep(idle).await;
        }
        warn!(worker = %self.worker.id, "no eligible job after {attempts} polls");
        Ok(None)
    }
}
