//! Error types for Convoy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Another hatchery holds a live booking on the job.
    #[error("job already booked")]
    AlreadyBooked,

    /// The job left the bookable/takeable window: stale booking, already
    /// taken, or already terminal.
    #[error("job is not waiting")]
    JobNotWaiting,

    #[error("invalid or consumed token")]
    InvalidToken,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("artifact upload failed: {0}")]
    ArtifactUploadFailed(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Book/take conflicts are expected under concurrent polling and are
    /// recovered by retrying against the next queue listing; they should be
    /// logged at debug level, not as failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyBooked | Error::JobNotWaiting)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
