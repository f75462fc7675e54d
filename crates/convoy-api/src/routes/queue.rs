//! Queue listing, booking, take, and spawn auditing.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use convoy_core::JobId;
use convoy_core::job::{JobRun, SpawnInfo};
use convoy_core::requirement::{Capability, CapabilityProfile};
use convoy_core::worker::TakeForm;

use crate::AppState;
use crate::auth::{Caller, HatcheryAuth, WorkerAuth};
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue))
        .route("/{id}/book", post(book_job))
        .route("/{id}/take", post(take_job))
        .route("/{id}/spawn/infos", post(add_spawn_infos))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    /// Override the model to match against; hatcheries list for the
    /// workers they can produce, not for themselves.
    model: Option<String>,
    /// Comma-separated binary capabilities.
    binaries: Option<String>,
}

impl ListQuery {
    fn profile_override(&self) -> Option<CapabilityProfile> {
        if self.model.is_none() && self.binaries.is_none() {
            return None;
        }
        let capabilities = self
            .binaries
            .as_deref()
            .map(|list| {
                list.split(',')
                    .filter(|name| !name.is_empty())
                    .map(Capability::binary)
                    .collect()
            })
            .unwrap_or_default();
        Some(CapabilityProfile::new(
            self.model.clone().unwrap_or_default(),
            capabilities,
        ))
    }
}

async fn list_queue(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobRun>>, ApiError> {
    let profile = match (query.profile_override(), caller) {
        (Some(profile), _) => profile,
        (None, Caller::Worker(worker)) => worker.profile,
        (None, Caller::Hatchery(_)) => CapabilityProfile::default(),
    };
    let pending = state.store.list_pending(&profile, Utc::now()).await?;
    Ok(Json(pending))
}

async fn book_job(
    State(state): State<AppState>,
    HatcheryAuth(hatchery): HatcheryAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRun>, ApiError> {
    let booked = state
        .store
        .book(JobId::from_uuid(id), hatchery.id, state.lease, Utc::now())
        .await?;
    Ok(Json(booked))
}

async fn take_job(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path(id): Path<Uuid>,
    Json(_form): Json<TakeForm>,
) -> Result<Json<JobRun>, ApiError> {
    let taken = state
        .store
        .take(JobId::from_uuid(id), worker.id, Utc::now())
        .await?;
    Ok(Json(taken))
}

#[derive(Debug, Deserialize)]
struct SpawnInfoPayload {
    message: String,
}

async fn add_spawn_infos(
    State(state): State<AppState>,
    HatcheryAuth(hatchery): HatcheryAuth,
    Path(id): Path<Uuid>,
    Json(infos): Json<Vec<SpawnInfoPayload>>,
) -> Result<(), ApiError> {
    let job_id = JobId::from_uuid(id);
    for info in infos {
        state
            .store
            .add_spawn_info(job_id, SpawnInfo::now(hatchery.id, info.message))
            .await?;
    }
    Ok(())
}
