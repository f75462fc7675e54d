//! Artifact upload, listing, and download.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use convoy_core::artifact::Artifact;
use convoy_core::{ArtifactId, JobId, NodeRunId};
use convoy_store::ingest_artifact;

use crate::AppState;
use crate::auth::{UserAuth, WorkerAuth};
use crate::error::ApiError;

/// Worker-facing upload route, mounted under `/queue` with the other
/// job-owner routes.
pub fn queue_router() -> Router<AppState> {
    Router::new().route("/{id}/artifact/{tag}", post(upload_artifact))
}

/// User-facing read routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/node-runs/{id}/artifacts", get(list_artifacts))
        .route("/artifacts/{id}/download", get(download_artifact))
}

async fn upload_artifact(
    State(state): State<AppState>,
    WorkerAuth(worker): WorkerAuth,
    Path((id, tag)): Path<(Uuid, String)>,
    mut multipart: Multipart,
) -> Result<Json<Artifact>, ApiError> {
    let job = state.store.job(JobId::from_uuid(id)).await?;
    if job.worker_id != Some(worker.id) {
        return Err(ApiError::forbidden("job is owned by another worker"));
    }

    let mut size: Option<i64> = None;
    let mut perm: u32 = 0o644;
    let mut md5: Option<String> = None;
    let mut name: Option<String> = None;
    let mut data: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let read = |e: axum::extract::multipart::MultipartError| {
            ApiError::bad_request(format!("malformed multipart field: {e}"))
        };
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("size") => size = field.text().await.map_err(read)?.parse().ok(),
            Some("perm") => {
                perm = field.text().await.map_err(read)?.parse().unwrap_or(0o644);
            }
            Some("md5sum") => md5 = Some(field.text().await.map_err(read)?),
            Some("file") => {
                name = field.file_name().map(str::to_string);
                data = Some(field.bytes().await.map_err(read)?);
            }
            _ => {}
        }
    }

    let size = size.ok_or_else(|| ApiError::bad_request("missing size field"))?;
    let md5 = md5.ok_or_else(|| ApiError::bad_request("missing md5sum field"))?;
    let name = name.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    let data = data.ok_or_else(|| ApiError::bad_request("missing file field"))?;

    let artifact = ingest_artifact(
        state.store.as_ref(),
        state.objects.as_ref(),
        job.node_run_id,
        &name,
        &tag,
        size,
        &md5,
        perm,
        data,
    )
    .await?;
    Ok(Json(artifact))
}

async fn list_artifacts(
    State(state): State<AppState>,
    _user: UserAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Artifact>>, ApiError> {
    let artifacts = state.store.artifacts(NodeRunId::from_uuid(id)).await?;
    Ok(Json(artifacts))
}

async fn download_artifact(
    State(state): State<AppState>,
    _user: UserAuth,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let artifact = state.store.artifact(ArtifactId::from_uuid(id)).await?;
    let data = state.objects.get(&artifact.object_path).await?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.name),
        )
        .body(Body::from(data))
        .map_err(|e| ApiError(convoy_core::Error::Internal(e.to_string())))?;
    Ok(response)
}
