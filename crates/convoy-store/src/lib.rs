//! Shared backing store for the Convoy job queue and booking ledger.
//!
//! The store is the single source of truth for what is runnable now. It is
//! accessed concurrently by any number of API instances, hatcheries, and
//! workers, so every state-changing job operation is one conditional update
//! against the current status — the in-memory implementation
//! checks-and-mutates under a single lock, the PostgreSQL implementation
//! uses conditional `UPDATE … RETURNING` statements. Listing is read-only
//! and allowed to be stale; a stale caller simply loses the following
//! book or take.

pub mod ingest;
pub mod memory;
pub mod objectstore;
pub mod postgres;
pub mod queue;
pub mod registry;

pub use ingest::{IngestStore, ingest_artifact};
pub use memory::MemoryStore;
pub use objectstore::FsObjectStore;
pub use postgres::PgStore;
pub use queue::JobStore;
pub use registry::RegistryStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Everything the engine needs from a backing store, in one object-safe
/// bundle.
pub trait Store: JobStore + RegistryStore + IngestStore {}

impl<T: JobStore + RegistryStore + IngestStore> Store for T {}

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
