//! API routes.

pub mod artifacts;
pub mod health;
pub mod queue;
pub mod register;
pub mod run;

use axum::Router;

use crate::AppState;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/queue",
            queue::router()
                .merge(run::router())
                .merge(artifacts::queue_router()),
        )
        .merge(artifacts::router())
        .merge(register::router())
        .merge(health::router())
        .with_state(state)
}
