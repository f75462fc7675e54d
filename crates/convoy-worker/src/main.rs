//! Convoy worker binary.
//!
//! Spawned by a hatchery with its registration token and (usually) a
//! booked job in the environment, or started by hand against a persistent
//! token.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use convoy_core::worker::RegistrationForm;
use convoy_store::{PgStore, create_pool};
use convoy_worker::{Session, SessionConfig, ShellRunner};

#[derive(Debug, Parser)]
#[command(name = "convoy-worker", about = "Ephemeral job executor")]
struct Args {
    #[arg(long, env = "CONVOY_DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "CONVOY_WORKER_NAME")]
    name: String,

    /// Registration token, single-use when minted by a hatchery.
    #[arg(long, env = "CONVOY_WORKER_TOKEN")]
    token: String,

    #[arg(long, env = "CONVOY_WORKER_MODEL", default_value = "debian-12")]
    model: String,

    /// Heartbeat interval, in seconds.
    #[arg(long, env = "CONVOY_HEARTBEAT_INTERVAL", default_value_t = 30)]
    heartbeat_interval: u64,

    /// How many empty polls to tolerate before giving up.
    #[arg(long, env = "CONVOY_POLL_ATTEMPTS", default_value_t = 12)]
    poll_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let pool = create_pool(&args.database_url).await?;
    let store = Arc::new(PgStore::new(pool));

    let session = Session::register(
        store,
        Arc::new(ShellRunner),
        RegistrationForm {
            name: args.name,
            token: args.token,
            model: args.model,
            capabilities: vec![],
        },
    )
    .await?;

    let config = SessionConfig {
        heartbeat_interval: std::time::Duration::from_secs(args.heartbeat_interval),
    };
    let heartbeat = session.start_heartbeat(&config);

    let status = session
        .run_until_done(args.poll_attempts, std::time::Duration::from_secs(5))
        .await?;
    heartbeat.abort();

    match status {
        Some(status) => info!(%status, "job finished"),
        None => info!("nothing to do"),
    }
    Ok(())
}
