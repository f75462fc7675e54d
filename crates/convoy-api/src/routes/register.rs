//! Worker and hatchery registration.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use convoy_core::JobId;
use convoy_core::worker::{Hatchery, HatcheryForm, RegistrationForm, Worker};

use crate::AppState;
use crate::auth::WorkerAuth;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workers/register", post(register_worker))
        .route("/workers/heartbeat", post(worker_heartbeat))
        .route("/hatcheries/register", post(register_hatchery))
}

#[derive(Debug, Serialize)]
struct RegisteredWorker {
    worker: Worker,
    /// The job this worker's token was booked for, if any.
    booked_job_id: Option<JobId>,
}

async fn register_worker(
    State(state): State<AppState>,
    Json(form): Json<RegistrationForm>,
) -> Result<Json<RegisteredWorker>, ApiError> {
    let (worker, booked_job_id) = state.store.register_worker(form, Utc::now()).await?;
    Ok(Json(RegisteredWorker {
        worker,
        booked_job_id,
    }))
}

async fn worker_heartbeat(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
) -> Result<(), ApiError> {
    state.store.worker_heartbeat(worker.id, Utc::now()).await?;
    Ok(())
}

async fn register_hatchery(
    State(state): State<AppState>,
    Json(form): Json<HatcheryForm>,
) -> Result<Json<Hatchery>, ApiError> {
    let hatchery = state.store.register_hatchery(form, Utc::now()).await?;
    Ok(Json(hatchery))
}
