//! PostgreSQL store.
//!
//! Several API instances and hatcheries share one database with no
//! in-process lock between them, so every job transition here is a single
//! conditional `UPDATE … WHERE status IN (…) RETURNING` — the losing side
//! of a race sees zero rows and reads the job back only to pick the right
//! conflict error.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use convoy_core::artifact::Artifact;
use convoy_core::job::{JobResult, JobRun, LogLine, SpawnInfo, StepStatus, Variable};
use convoy_core::report::TestReport;
use convoy_core::requirement::{Capability, CapabilityProfile};
use convoy_core::token::{RegistrationToken, TokenScope};
use convoy_core::worker::{Hatchery, HatcheryForm, RegistrationForm, Worker};
use convoy_core::{
    ArtifactId, Error, HatcheryId, JobId, JobStatus, NodeRunId, Result, WorkerId,
};

use crate::ingest::IngestStore;
use crate::queue::JobStore;
use crate::registry::RegistryStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(err: sqlx::Error) -> Error {
    Error::Storage(err.to_string())
}

fn decode_err(err: serde_json::Error) -> Error {
    Error::Storage(format!("corrupt json column: {err}"))
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    node_run_id: Uuid,
    requirements: serde_json::Value,
    steps: serde_json::Value,
    status: String,
    booked_by: Option<Uuid>,
    book_deadline: Option<DateTime<Utc>>,
    worker_id: Option<Uuid>,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRun {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobRun {
            id: JobId::from_uuid(row.id),
            node_run_id: NodeRunId::from_uuid(row.node_run_id),
            requirements: serde_json::from_value(row.requirements).map_err(decode_err)?,
            steps: serde_json::from_value(row.steps).map_err(decode_err)?,
            status: row.status.parse().map_err(Error::Storage)?,
            booked_by: row.booked_by.map(HatcheryId::from_uuid),
            book_deadline: row.book_deadline,
            worker_id: row.worker_id.map(WorkerId::from_uuid),
            queued_at: row.queued_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: Uuid,
    name: String,
    token: String,
    model: String,
    capabilities: serde_json::Value,
    group_name: String,
    hatchery_id: Option<Uuid>,
    job_id: Option<Uuid>,
    registered_at: DateTime<Utc>,
    last_beat: DateTime<Utc>,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = Error;

    fn try_from(row: WorkerRow) -> Result<Self> {
        let capabilities: Vec<Capability> =
            serde_json::from_value(row.capabilities).map_err(decode_err)?;
        Ok(Worker {
            id: WorkerId::from_uuid(row.id),
            name: row.name,
            token: row.token,
            profile: CapabilityProfile::new(row.model, capabilities),
            group: row.group_name,
            hatchery_id: row.hatchery_id.map(HatcheryId::from_uuid),
            job_id: row.job_id.map(JobId::from_uuid),
            registered_at: row.registered_at,
            last_beat: row.last_beat,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HatcheryRow {
    id: Uuid,
    name: String,
    token: String,
    group_name: String,
    max_workers: i32,
    registered_at: DateTime<Utc>,
    last_beat: DateTime<Utc>,
}

impl From<HatcheryRow> for Hatchery {
    fn from(row: HatcheryRow) -> Self {
        Hatchery {
            id: HatcheryId::from_uuid(row.id),
            name: row.name,
            token: row.token,
            group: row.group_name,
            max_workers: row.max_workers.max(0) as u32,
            registered_at: row.registered_at,
            last_beat: row.last_beat,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: Uuid,
    node_run_id: Uuid,
    name: String,
    tag: String,
    size: i64,
    perm: i32,
    md5: String,
    object_path: String,
    created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Artifact {
            id: ArtifactId::from_uuid(row.id),
            node_run_id: NodeRunId::from_uuid(row.node_run_id),
            name: row.name,
            tag: row.tag,
            size: row.size,
            perm: row.perm.max(0) as u32,
            md5: row.md5,
            object_path: row.object_path,
            created_at: row.created_at,
        }
    }
}

fn scope_str(scope: TokenScope) -> &'static str {
    match scope {
        TokenScope::SingleUse => "single_use",
        TokenScope::Persistent => "persistent",
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue(&self, job: JobRun) -> Result<JobRun> {
        sqlx::query(
            r#"
            INSERT INTO job_runs
                (id, node_run_id, requirements, steps, status, queued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.node_run_id.as_uuid())
        .bind(serde_json::to_value(&job.requirements).map_err(decode_err)?)
        .bind(serde_json::to_value(&job.steps).map_err(decode_err)?)
        .bind(job.status.as_str())
        .bind(job.queued_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(job)
    }

    async fn job(&self, id: JobId) -> Result<JobRun> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM job_runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?.try_into()
    }

    async fn list_pending(
        &self,
        profile: &CapabilityProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRun>> {
        // Lazy lease-expiry requeue before listing.
        sqlx::query(
            r#"
            UPDATE job_runs
            SET status = 'Waiting', booked_by = NULL, book_deadline = NULL
            WHERE status = 'Booked' AND book_deadline <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM job_runs WHERE status = 'Waiting' ORDER BY queued_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // Requirement matching is domain logic; filter here rather than in SQL.
        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let job: JobRun = row.try_into()?;
            if profile.satisfies_all(&job.requirements) {
                pending.push(job);
            }
        }
        Ok(pending)
    }

    async fn book(
        &self,
        job_id: JobId,
        hatchery_id: HatcheryId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobRun> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE job_runs
            SET status = 'Booked', booked_by = $2, book_deadline = $3
            WHERE id = $1
              AND (status = 'Waiting'
                   OR (status = 'Booked' AND booked_by = $2)
                   OR (status = 'Booked' AND book_deadline <= $4))
            RETURNING *
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(hatchery_id.as_uuid())
        .bind(now + lease)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.try_into(),
            None => match self.job(job_id).await?.status {
                JobStatus::Booked => Err(Error::AlreadyBooked),
                _ => Err(Error::JobNotWaiting),
            },
        }
    }

    async fn release(&self, job_id: JobId, hatchery_id: HatcheryId) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = 'Waiting', booked_by = NULL, book_deadline = NULL
            WHERE id = $1 AND status = 'Booked' AND booked_by = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(hatchery_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if done.rows_affected() == 0 {
            let job = self.job(job_id).await?;
            if job.status == JobStatus::Booked {
                return Err(Error::Forbidden("booking held by another hatchery".to_string()));
            }
            return Err(Error::JobNotWaiting);
        }
        Ok(())
    }

    async fn take(&self, job_id: JobId, worker_id: WorkerId, now: DateTime<Utc>) -> Result<JobRun> {
        let worker = self.worker(worker_id).await?;
        let spawned_by = worker.hatchery_id.map(|h| *h.as_uuid());

        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE job_runs
            SET status = 'Building', worker_id = $2, started_at = $3,
                booked_by = NULL, book_deadline = NULL
            WHERE id = $1
              AND (status = 'Waiting'
                   OR (status = 'Booked' AND book_deadline <= $3)
                   OR (status = 'Booked' AND $4::uuid IS NOT NULL AND booked_by = $4))
            RETURNING *
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_uuid())
        .bind(now)
        .bind(spawned_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            // Missing job reads as NotFound; anything else lost the race.
            self.job(job_id).await?;
            return Err(Error::JobNotWaiting);
        };

        sqlx::query("UPDATE workers SET job_id = $2 WHERE id = $1")
            .bind(worker_id.as_uuid())
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        row.try_into()
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

        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE job_runs
            SET status = $3, ended_at = $4
            WHERE id = $1 AND status = 'Building' AND worker_id = $2
            RETURNING *
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_uuid())
        .bind(result.status.as_str())
        .bind(result.remote_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let row = match row {
            Some(row) => row,
            None => {
                let job = self.job(job_id).await?;
                if job.status == JobStatus::Building && job.worker_id != Some(worker_id) {
                    return Err(Error::Forbidden("job is owned by another worker".to_string()));
                }
                return Err(Error::JobNotWaiting);
            }
        };

        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(worker_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        row.try_into()
    }

    async fn stop(&self, job_id: JobId) -> Result<JobRun> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE job_runs
            SET status = 'Stopped', ended_at = $2, booked_by = NULL, book_deadline = NULL
            WHERE id = $1 AND status IN ('Waiting', 'Booked', 'Building')
            RETURNING *
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.try_into(),
            None => {
                self.job(job_id).await?;
                Err(Error::JobNotWaiting)
            }
        }
    }

    async fn append_log(&self, job_id: JobId, line: LogLine) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_logs (job_id, step_order, at, value) VALUES ($1, $2, $3, $4)",
        )
        .bind(job_id.as_uuid())
        .bind(line.step_order)
        .bind(line.at)
        .bind(&line.value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn logs(&self, job_id: JobId) -> Result<Vec<LogLine>> {
        #[derive(sqlx::FromRow)]
        struct LogRow {
            step_order: i32,
            at: DateTime<Utc>,
            value: String,
        }

        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT step_order, at, value FROM job_logs WHERE job_id = $1 ORDER BY id ASC",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| LogLine {
                step_order: r.step_order,
                at: r.at,
                value: r.value,
            })
            .collect())
    }

    async fn set_step_status(&self, job_id: JobId, status: StepStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_step_statuses (job_id, step_order, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id, step_order) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(status.step_order)
        .bind(status.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn step_statuses(&self, job_id: JobId) -> Result<Vec<StepStatus>> {
        #[derive(sqlx::FromRow)]
        struct StepRow {
            step_order: i32,
            status: String,
        }

        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT step_order, status FROM job_step_statuses WHERE job_id = $1 ORDER BY step_order",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(StepStatus {
                    step_order: r.step_order,
                    status: r.status.parse().map_err(Error::Storage)?,
                })
            })
            .collect()
    }

    async fn add_spawn_info(&self, job_id: JobId, info: SpawnInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_spawn_infos (job_id, hatchery_id, message, at) VALUES ($1, $2, $3, $4)",
        )
        .bind(job_id.as_uuid())
        .bind(info.hatchery_id.as_uuid())
        .bind(&info.message)
        .bind(info.at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn spawn_infos(&self, job_id: JobId) -> Result<Vec<SpawnInfo>> {
        #[derive(sqlx::FromRow)]
        struct SpawnRow {
            hatchery_id: Uuid,
            message: String,
            at: DateTime<Utc>,
        }

        let rows: Vec<SpawnRow> = sqlx::query_as(
            "SELECT hatchery_id, message, at FROM job_spawn_infos WHERE job_id = $1 ORDER BY id ASC",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| SpawnInfo {
                hatchery_id: HatcheryId::from_uuid(r.hatchery_id),
                message: r.message,
                at: r.at,
            })
            .collect())
    }

    async fn stale_pending(&self, older_than: Duration, now: DateTime<Utc>) -> Result<Vec<JobRun>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM job_runs WHERE status = 'Waiting' AND queued_at <= $1 ORDER BY queued_at",
        )
        .bind(now - older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl RegistryStore for PgStore {
    async fn add_token(&self, token: RegistrationToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO registration_tokens
                (value, group_name, scope, hatchery_id, job_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.value)
        .bind(&token.group)
        .bind(scope_str(token.scope))
        .bind(token.hatchery_id.map(|h| *h.as_uuid()))
        .bind(token.job_id.map(|j| *j.as_uuid()))
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn token(&self, value: &str) -> Result<RegistrationToken> {
        #[derive(sqlx::FromRow)]
        struct FullTokenRow {
            value: String,
            group_name: String,
            scope: String,
            hatchery_id: Option<Uuid>,
            job_id: Option<Uuid>,
            consumed_by: Option<Uuid>,
            created_at: DateTime<Utc>,
        }

        let row: Option<FullTokenRow> =
            sqlx::query_as("SELECT * FROM registration_tokens WHERE value = $1")
                .bind(value)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let row = row.ok_or(Error::InvalidToken)?;

        let scope = match row.scope.as_str() {
            "single_use" => TokenScope::SingleUse,
            "persistent" => TokenScope::Persistent,
            other => return Err(Error::Storage(format!("unknown token scope: {other}"))),
        };
        Ok(RegistrationToken {
            value: row.value,
            group: row.group_name,
            scope,
            hatchery_id: row.hatchery_id.map(HatcheryId::from_uuid),
            job_id: row.job_id.map(JobId::from_uuid),
            consumed_by: row.consumed_by.map(WorkerId::from_uuid),
            created_at: row.created_at,
        })
    }

    async fn register_worker(
        &self,
        form: RegistrationForm,
        now: DateTime<Utc>,
    ) -> Result<(Worker, Option<JobId>)> {
        let worker_id = WorkerId::new();

        // Consuming the token is the compare-and-swap here: two workers
        // racing on one single-use token serialize on this update.
        #[derive(sqlx::FromRow)]
        struct TokenRow {
            group_name: String,
            hatchery_id: Option<Uuid>,
            job_id: Option<Uuid>,
        }

        let token: Option<TokenRow> = sqlx::query_as(
            r#"
            UPDATE registration_tokens
            SET consumed_by = CASE WHEN scope = 'single_use' THEN $2 ELSE consumed_by END
            WHERE value = $1 AND (scope = 'persistent' OR consumed_by IS NULL)
            RETURNING group_name, hatchery_id, job_id
            "#,
        )
        .bind(&form.token)
        .bind(worker_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let token = token.ok_or(Error::InvalidToken)?;

        sqlx::query(
            r#"
            INSERT INTO workers
                (id, name, token, model, capabilities, group_name, hatchery_id,
                 registered_at, last_beat)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(worker_id.as_uuid())
        .bind(&form.name)
        .bind(&form.token)
        .bind(&form.model)
        .bind(serde_json::to_value(&form.capabilities).map_err(decode_err)?)
        .bind(&token.group_name)
        .bind(token.hatchery_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let worker = Worker {
            id: worker_id,
            name: form.name,
            token: form.token,
            profile: CapabilityProfile::new(form.model, form.capabilities),
            group: token.group_name,
            hatchery_id: token.hatchery_id.map(HatcheryId::from_uuid),
            job_id: None,
            registered_at: now,
            last_beat: now,
        };
        Ok((worker, token.job_id.map(JobId::from_uuid)))
    }

    async fn worker(&self, id: WorkerId) -> Result<Worker> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.ok_or_else(|| Error::NotFound(format!("worker {id}")))?.try_into()
    }

    async fn worker_by_token(&self, token: &str) -> Result<Worker> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.ok_or(Error::InvalidToken)?.try_into()
    }

    async fn worker_heartbeat(&self, id: WorkerId, now: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query("UPDATE workers SET last_beat = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("worker {id}")));
        }
        Ok(())
    }

    async fn remove_worker(&self, id: WorkerId) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn register_hatchery(&self, form: HatcheryForm, now: DateTime<Utc>) -> Result<Hatchery> {
        #[derive(sqlx::FromRow)]
        struct TokenRow {
            group_name: String,
        }

        let token: Option<TokenRow> =
            sqlx::query_as("SELECT group_name FROM registration_tokens WHERE value = $1")
                .bind(&form.token)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let token = token.ok_or(Error::InvalidToken)?;

        let hatchery = Hatchery {
            id: HatcheryId::new(),
            name: form.name,
            token: form.token,
            group: token.group_name,
            max_workers: form.max_workers,
            registered_at: now,
            last_beat: now,
        };

        sqlx::query(
            r#"
            INSERT INTO hatcheries
                (id, name, token, group_name, max_workers, registered_at, last_beat)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(hatchery.id.as_uuid())
        .bind(&hatchery.name)
        .bind(&hatchery.token)
        .bind(&hatchery.group)
        .bind(hatchery.max_workers as i32)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(hatchery)
    }

    async fn hatchery(&self, id: HatcheryId) -> Result<Hatchery> {
        let row: Option<HatcheryRow> = sqlx::query_as("SELECT * FROM hatcheries WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.ok_or_else(|| Error::NotFound(format!("hatchery {id}")))?.into())
    }

    async fn hatchery_by_token(&self, token: &str) -> Result<Hatchery> {
        let row: Option<HatcheryRow> = sqlx::query_as("SELECT * FROM hatcheries WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.ok_or(Error::InvalidToken)?.into())
    }

    async fn hatchery_heartbeat(&self, id: HatcheryId, now: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query("UPDATE hatcheries SET last_beat = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("hatchery {id}")));
        }
        Ok(())
    }

    async fn reap_lost_workers(
        &self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>> {
        let rows: Vec<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE last_beat <= $1")
            .bind(now - timeout)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in rows {
            let worker: Worker = row.try_into()?;
            if let Some(job_id) = worker.job_id {
                let failed = sqlx::query(
                    r#"
                    UPDATE job_runs
                    SET status = 'Fail', ended_at = $3
                    WHERE id = $1 AND status = 'Building' AND worker_id = $2
                    "#,
                )
                .bind(job_id.as_uuid())
                .bind(worker.id.as_uuid())
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

                if failed.rows_affected() > 0 {
                    self.append_log(
                        job_id,
                        LogLine {
                            step_order: 0,
                            at: now,
                            value: format!(
                                "worker {} lost (heartbeat timeout), job failed",
                                worker.name
                            ),
                        },
                    )
                    .await?;
                }
            }
            self.remove_worker(worker.id).await?;
            reclaimed.push(worker.id);
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl IngestStore for PgStore {
    async fn store_artifact(&self, artifact: Artifact) -> Result<Artifact> {
        sqlx::query(
            r#"
            INSERT INTO artifacts
                (id, node_run_id, name, tag, size, perm, md5, object_path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.node_run_id.as_uuid())
        .bind(&artifact.name)
        .bind(&artifact.tag)
        .bind(artifact.size)
        .bind(artifact.perm as i32)
        .bind(&artifact.md5)
        .bind(&artifact.object_path)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(artifact)
    }

    async fn artifacts(&self, node_run_id: NodeRunId) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT * FROM artifacts WHERE node_run_id = $1 ORDER BY created_at",
        )
        .bind(node_run_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn artifact(&self, id: ArtifactId) -> Result<Artifact> {
        let row: Option<ArtifactRow> = sqlx::query_as("SELECT * FROM artifacts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.ok_or_else(|| Error::NotFound(format!("artifact {id}")))?.into())
    }

    async fn store_test_report(
        &self,
        node_run_id: NodeRunId,
        mut report: TestReport,
    ) -> Result<TestReport> {
        report.recompute();
        sqlx::query(
            r#"
            INSERT INTO test_reports (node_run_id, report, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (node_run_id)
            DO UPDATE SET report = EXCLUDED.report, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(node_run_id.as_uuid())
        .bind(serde_json::to_value(&report).map_err(decode_err)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(report)
    }

    async fn test_report(&self, node_run_id: NodeRunId) -> Result<Option<TestReport>> {
        #[derive(sqlx::FromRow)]
        struct ReportRow {
            report: serde_json::Value,
        }

        let row: Option<ReportRow> =
            sqlx::query_as("SELECT report FROM test_reports WHERE node_run_id = $1")
                .bind(node_run_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(|r| serde_json::from_value(r.report).map_err(decode_err))
            .transpose()
    }

    async fn set_variable(&self, node_run_id: NodeRunId, variable: Variable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_variables (node_run_id, name, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (node_run_id, name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(node_run_id.as_uuid())
        .bind(&variable.name)
        .bind(&variable.value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn variables(&self, node_run_id: NodeRunId) -> Result<Vec<Variable>> {
        #[derive(sqlx::FromRow)]
        struct VariableRow {
            name: String,
            value: String,
        }

        let rows: Vec<VariableRow> = sqlx::query_as(
            "SELECT name, value FROM run_variables WHERE node_run_id = $1 ORDER BY name",
        )
        .bind(node_run_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| Variable {
                name: r.name,
                value: r.value,
            })
            .collect())
    }
}
