//! The backend-independent pool control loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use convoy_core::driver::{ComputeDriver, Instance, WorkerSpec};
use convoy_core::job::{JobRun, SpawnInfo};
use convoy_core::token::RegistrationToken;
use convoy_core::worker::Hatchery;
use convoy_core::{JobId, JobStatus, Result, expired};
use convoy_store::Store;

/// Tuning for one hatchery process.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Booking lease granted when this hatchery reserves a job.
    pub lease: chrono::Duration,
    /// Delay between polling cycles.
    pub poll_interval: std::time::Duration,
    /// Workers silent for longer than this are reclaimed.
    pub heartbeat_timeout: chrono::Duration,
    /// How long a spawned instance may sit without its job reaching
    /// `Building` before it is treated as an orphan.
    pub grace: chrono::Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lease: chrono::Duration::minutes(2),
            poll_interval: std::time::Duration::from_secs(5),
            heartbeat_timeout: chrono::Duration::seconds(90),
            grace: chrono::Duration::minutes(5),
        }
    }
}

/// One instance this hatchery has provisioned and still tracks.
#[derive(Debug, Clone)]
pub struct SpawnedWorker {
    pub instance: Instance,
    pub job_id: Option<JobId>,
    /// The registration token the instance was given; used to find the
    /// worker identity it registered as.
    pub token: String,
    pub spawned_at: DateTime<Utc>,
}

/// Registry of currently-alive instances, owned by the controller and
/// passed by reference into the spawn and reclaim paths. Keyed by worker
/// name.
#[derive(Default)]
pub struct SpawnRegistry {
    inner: Mutex<HashMap<String, SpawnedWorker>>,
}

impl SpawnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: String, spawned: SpawnedWorker) {
        self.lock().insert(name, spawned);
    }

    pub fn remove(&self, name: &str) -> Option<SpawnedWorker> {
        self.lock().remove(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, SpawnedWorker)> {
        self.lock()
            .iter()
            .map(|(name, spawned)| (name.clone(), spawned.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SpawnedWorker>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Polls the queue, books matching jobs, and provisions workers for them.
///
/// Each hatchery instance runs its own loop with no central coordination; a
/// crashed hatchery leaves nothing behind but bookings that lapse on their
/// own.
pub struct PoolController {
    hatchery: Hatchery,
    store: Arc<dyn Store>,
    driver: Arc<dyn ComputeDriver>,
    config: PoolConfig,
    registry: SpawnRegistry,
}

impl PoolController {
    pub fn new(
        hatchery: Hatchery,
        store: Arc<dyn Store>,
        driver: Arc<dyn ComputeDriver>,
        config: PoolConfig,
    ) -> Self {
        Self {
            hatchery,
            store,
            driver,
            config,
            registry: SpawnRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SpawnRegistry {
        &self.registry
    }

    /// Run the polling loop until the process is stopped.
    pub async fn run(&self) {
        info!(
            hatchery = %self.hatchery.name,
            backend = self.driver.name(),
            "starting hatchery"
        );
        loop {
            if let Err(e) = self
                .store
                .hatchery_heartbeat(self.hatchery.id, Utc::now())
                .await
            {
                warn!(error = %e, "heartbeat failed");
            }
            if let Err(e) = self.cycle(Utc::now()).await {
                warn!(error = %e, "poll cycle failed");
            }
            if let Err(e) = self.cleanup(Utc::now()).await {
                warn!(error = %e, "cleanup pass failed");
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// One polling cycle: reap, list, book, spawn. Returns how many workers
    /// were provisioned.
    pub async fn cycle(&self, now: DateTime<Utc>) -> Result<usize> {
        // Lazy reclaim of lost workers; the lease sweep happens inside
        // list_pending.
        let reclaimed = self
            .store
            .reap_lost_workers(self.config.heartbeat_timeout, now)
            .await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed lost workers");
        }

        let pending = self.store.list_pending(&self.driver.profile(), now).await?;
        let mut spawned = 0;
        for job in pending {
            if self.registry.len() >= self.hatchery.max_workers as usize {
                debug!(max = self.hatchery.max_workers, "at capacity");
                break;
            }
            match self
                .store
                .book(job.id, self.hatchery.id, self.config.lease, now)
                .await
            {
                Ok(_) => {}
                // Another hatchery won the race; move on to the next job.
                Err(e) if e.is_conflict() => {
                    debug!(job = %job.id, "lost booking race");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if self.provision(&job, now).await? {
                spawned += 1;
            }
        }
        Ok(spawned)
    }

    /// Spawn one worker for a booked job. Records a spawn-info entry for
    /// the attempt whether it works or not, and releases the booking when
    /// provisioning fails so the job returns to the pool.
    async fn provision(&self, job: &JobRun, now: DateTime<Utc>) -> Result<bool> {
        let token = RegistrationToken::for_spawn(&self.hatchery.group, self.hatchery.id, Some(job.id));
        self.store.add_token(token.clone()).await?;

        let name = format!("{}-{}", self.hatchery.name, &token.value[..8]);
        let spec = WorkerSpec {
            name: name.clone(),
            registration_token: token.value.clone(),
            model: self.driver.profile().model,
            job_id: Some(job.id),
            env: HashMap::new(),
        };

        match self.driver.spawn(spec).await {
            Ok(instance) => {
                self.store
                    .add_spawn_info(
                        job.id,
                        SpawnInfo::now(
                            self.hatchery.id,
                            format!("spawning worker {name} on {}", self.driver.name()),
                        ),
                    )
                    .await?;
                self.registry.insert(
                    name,
                    SpawnedWorker {
                        instance,
                        job_id: Some(job.id),
                        token: token.value,
                        spawned_at: now,
                    },
                );
                Ok(true)
            }
            Err(e) => {
                warn!(job = %job.id, error = %e, "spawn failed, releasing booking");
                self.store
                    .add_spawn_info(
                        job.id,
                        SpawnInfo::now(
                            self.hatchery.id,
                            format!("spawn of worker {name} failed: {e}"),
                        ),
                    )
                    .await?;
                if let Err(release_err) = self.store.release(job.id, self.hatchery.id).await {
                    // The lease will lapse on its own.
                    debug!(job = %job.id, error = %release_err, "release failed");
                }
                Ok(false)
            }
        }
    }

    /// Terminate instances whose worker never reached `Building` within the
    /// grace period, or whose job is already terminal. Backend-specific
    /// cleanup, not part of the shared protocol.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<()> {
        for (name, spawned) in self.registry.snapshot() {
            if !self.should_reclaim(&spawned, now).await {
                continue;
            }
            info!(worker = %name, "terminating instance");
            if let Err(e) = self.driver.terminate(&spawned.instance).await {
                warn!(worker = %name, error = %e, "terminate failed");
                continue;
            }
            self.registry.remove(&name);
        }
        Ok(())
    }

    async fn should_reclaim(&self, spawned: &SpawnedWorker, now: DateTime<Utc>) -> bool {
        if let Some(job_id) = spawned.job_id {
            if let Ok(job) = self.store.job(job_id).await {
                if job.status.is_terminal() {
                    return true;
                }
                if job.status == JobStatus::Building {
                    return false;
                }
            }
        } else if let Ok(worker) = self.store.worker_by_token(&spawned.token).await {
            if worker.job_id.is_some() {
                return false;
            }
        }
        expired(spawned.spawned_at + self.config.grace, now)
    }
}
