//! Convoy hatchery daemon.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use convoy_core::driver::ComputeDriver;
use convoy_core::requirement::{Capability, CapabilityProfile};
use convoy_core::worker::HatcheryForm;
use convoy_hatchery::drivers::{DockerDriver, KubernetesDriver, LocalDriver};
use convoy_hatchery::{PoolConfig, PoolController};
use convoy_store::{PgStore, RegistryStore, create_pool};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Docker,
    Kubernetes,
}

#[derive(Debug, Parser)]
#[command(name = "convoy-hatchery", about = "Provisioning agent for one compute backend")]
struct Args {
    #[arg(long, env = "CONVOY_DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "CONVOY_HATCHERY_NAME")]
    name: String,

    /// Registration token for this hatchery.
    #[arg(long, env = "CONVOY_HATCHERY_TOKEN")]
    token: String,

    #[arg(long, value_enum, env = "CONVOY_BACKEND", default_value_t = Backend::Local)]
    backend: Backend,

    /// Maximum number of concurrently provisioned workers.
    #[arg(long, env = "CONVOY_MAX_WORKERS", default_value_t = 5)]
    max_workers: u32,

    /// Model name of the workers this backend produces.
    #[arg(long, env = "CONVOY_WORKER_MODEL", default_value = "debian-12")]
    model: String,

    /// Binary capabilities the workers declare (repeatable).
    #[arg(long = "capability")]
    capabilities: Vec<String>,

    /// Worker binary, for the local backend.
    #[arg(long, env = "CONVOY_WORKER_BINARY", default_value = "convoy-worker")]
    worker_binary: PathBuf,

    /// Worker image, for the docker and kubernetes backends.
    #[arg(long, env = "CONVOY_WORKER_IMAGE", default_value = "convoy/worker:latest")]
    worker_image: String,

    #[arg(long, env = "CONVOY_K8S_NAMESPACE", default_value = "convoy")]
    namespace: String,

    /// Booking lease, in seconds.
    #[arg(long, env = "CONVOY_LEASE_SECONDS", default_value_t = 120)]
    lease_seconds: i64,

    /// Delay between polling cycles, in seconds.
    #[arg(long, env = "CONVOY_POLL_SECONDS", default_value_t = 5)]
    poll_seconds: u64,

    /// Worker heartbeat timeout, in seconds.
    #[arg(long, env = "CONVOY_HEARTBEAT_SECONDS", default_value_t = 90)]
    heartbeat_seconds: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let profile = CapabilityProfile::new(
        args.model.clone(),
        args.capabilities.iter().map(Capability::binary).collect(),
    );

    info!("connecting to store");
    let pool = create_pool(&args.database_url).await?;
    let store = Arc::new(PgStore::new(pool));

    let hatchery = store
        .register_hatchery(
            HatcheryForm {
                name: args.name.clone(),
                token: args.token.clone(),
                max_workers: args.max_workers,
            },
            Utc::now(),
        )
        .await?;
    info!(hatchery = %hatchery.id, "registered");

    let driver: Arc<dyn ComputeDriver> = match args.backend {
        Backend::Local => Arc::new(LocalDriver::new(args.worker_binary, profile)),
        Backend::Docker => Arc::new(DockerDriver::new(
            args.name.clone(),
            args.worker_image,
            profile,
        )?),
        Backend::Kubernetes => Arc::new(
            KubernetesDriver::new(
                args.namespace,
                args.name.clone(),
                args.worker_image,
                profile,
            )
            .await?,
        ),
    };

    let config = PoolConfig {
        lease: chrono::Duration::seconds(args.lease_seconds),
        poll_interval: std::time::Duration::from_secs(args.poll_seconds),
        heartbeat_timeout: chrono::Duration::seconds(args.heartbeat_seconds),
        ..PoolConfig::default()
    };

    PoolController::new(hatchery, store, driver, config).run().await;
    Ok(())
}
