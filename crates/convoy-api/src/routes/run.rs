//! Job-owner reporting: logs, step statuses, tests, variables, results.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use convoy_core::job::{JobResult, JobRun, LogLine, StepStatus, Variable};
use convoy_core::report::TestReport;
use convoy_core::worker::Worker;
use convoy_core::JobId;

use crate::AppState;
use crate::auth::WorkerAuth;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/log", post(append_log))
        .route("/{id}/step", post(set_step_status))
        .route("/{id}/test", post(report_tests))
        .route("/{id}/variable", post(set_variable))
        .route("/{id}/result", post(report_result))
}

/// Only the worker the job is assigned to may report against it.
async fn owned_job(state: &AppState, id: Uuid, worker: &Worker) -> convoy_core::Result<JobRun> {
    let job = state.store.job(JobId::from_uuid(id)).await?;
    if job.worker_id != Some(worker.id) {
        return Err(convoy_core::Error::Forbidden(
            "job is owned by another worker".to_string(),
        ));
    }
    Ok(job)
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    step_order: i32,
    value: String,
}

async fn append_log(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(payload): Json<LogPayload>,
) -> Result<(), ApiError> {
    let job = owned_job(&state, id, &worker).await?;
    state
        .store
        .append_log(job.id, LogLine::new(payload.step_order, payload.value))
        .await?;
    Ok(())
}

async fn set_step_status(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(status): Json<StepStatus>,
) -> Result<(), ApiError> {
    let job = owned_job(&state, id, &worker).await?;
    state.store.set_step_status(job.id, status).await?;
    Ok(())
}

async fn report_tests(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(report): Json<TestReport>,
) -> Result<Json<TestReport>, ApiError> {
    let job = owned_job(&state, id, &worker).await?;
    let stored = state.store.store_test_report(job.node_run_id, report).await?;
    Ok(Json(stored))
}

async fn set_variable(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(variable): Json<Variable>,
) -> Result<(), ApiError> {
    let job = owned_job(&state, id, &worker).await?;
    state.store.set_variable(job.node_run_id, variable).await?;
    Ok(())
}

async fn report_result(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(result): Json<JobResult>,
) -> Result<Json<JobRun>, ApiError> {
    // Ownership is enforced by the conditional update itself.
    let finished = state
        .store
        .report_result(JobId::from_uuid(id), worker.id, result)
        .await?;
    Ok(Json(finished))
}
