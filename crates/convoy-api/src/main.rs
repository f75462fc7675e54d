//! Convoy API server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use convoy_api::{AppState, routes};
use convoy_store::{FsObjectStore, PgStore, create_pool, run_migrations};

#[derive(Debug, Parser)]
#[command(name = "convoy-server", about = "Queue and provisioning API")]
struct Args {
    #[arg(long, env = "CONVOY_DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "CONVOY_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Base directory for artifact blobs.
    #[arg(long, env = "CONVOY_ARTIFACT_DIR", default_value = "/var/lib/convoy/artifacts")]
    artifact_dir: PathBuf,

    /// Booking lease, in seconds.
    #[arg(long, env = "CONVOY_LEASE_SECONDS", default_value_t = 120)]
    lease_seconds: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("connecting to database");
    let pool = create_pool(&args.database_url).await?;
    run_migrations(&pool).await?;
    info!("database ready");

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(FsObjectStore::new(args.artifact_dir)),
    )
    .with_lease(chrono::Duration::seconds(args.lease_seconds));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("starting server on {}", args.listen);
    let listener = TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
