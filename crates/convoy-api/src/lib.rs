//! HTTP API server for the Convoy CD engine.
//!
//! A thin axum surface over the shared store: workers, hatcheries, and the
//! run controller are separate processes, and everything stateful happens
//! as store operations so any number of API instances can serve the same
//! database.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;
