//! Bearer-token auth extractors.
//!
//! Workers and hatcheries authenticate with their registration tokens;
//! users present any token issued to their group. Token issuance itself is
//! an external collaborator — the extractors only resolve a presented
//! token to an identity the store already knows.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use convoy_core::Error;
use convoy_core::worker::{Hatchery, Worker};

use crate::error::ApiError;
use crate::state::AppState;

fn bearer_token(parts: &Parts) -> Result<String, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or(ApiError(Error::InvalidToken))
}

/// A caller holding a registered worker identity.
pub struct WorkerAuth(pub Worker);

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let worker = state
            .store
            .worker_by_token(&token)
            .await
            .map_err(|_| ApiError::forbidden("worker identity required"))?;
        Ok(WorkerAuth(worker))
    }
}

/// A caller holding a registered hatchery identity.
pub struct HatcheryAuth(pub Hatchery);

impl FromRequestParts<AppState> for HatcheryAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let hatchery = state
            .store
            .hatchery_by_token(&token)
            .await
            .map_err(|_| ApiError::forbidden("hatchery identity required"))?;
        Ok(HatcheryAuth(hatchery))
    }
}

/// A queue reader: worker or hatchery.
pub enum Caller {
    Worker(Worker),
    Hatchery(Hatchery),
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if let Ok(worker) = state.store.worker_by_token(&token).await {
            return Ok(Caller::Worker(worker));
        }
        if let Ok(hatchery) = state.store.hatchery_by_token(&token).await {
            return Ok(Caller::Hatchery(hatchery));
        }
        Err(ApiError::forbidden("worker or hatchery identity required"))
    }
}

/// A group-scoped human caller, resolved from any issued token.
pub struct UserAuth {
    pub group: String,
}

impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let token = state.store.token(&token).await.map_err(ApiError::from)?;
        Ok(UserAuth { group: token.group })
    }
}
