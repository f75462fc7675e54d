//! Queue and booking-ledger protocol tests against the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};

use convoy_core::job::{JobResult, JobRun, LogLine, Step};
use convoy_core::requirement::{Capability, CapabilityProfile, Requirement};
use convoy_core::token::{RegistrationToken, TokenScope};
use convoy_core::worker::{HatcheryForm, RegistrationForm};
use convoy_core::{Error, JobStatus};
use convoy_store::{JobStore, MemoryStore, RegistryStore};

fn default_profile() -> CapabilityProfile {
    CapabilityProfile::new("debian-12", vec![Capability::binary("git")])
}

fn job_with(requirements: Vec<Requirement>) -> JobRun {
    JobRun::new(
        convoy_core::NodeRunId::new(),
        requirements,
        vec![Step::new("build", "make all")],
    )
}

async fn register_worker(store: &MemoryStore, name: &str) -> convoy_core::worker::Worker {
    let token = RegistrationToken::new("builders", TokenScope::Persistent);
    store.add_token(token.clone()).await.unwrap();
    let (worker, _) = store
        .register_worker(
            RegistrationForm {
                name: name.to_string(),
                token: token.value,
                model: "debian-12".to_string(),
                capabilities: vec![Capability::binary("git")],
            },
            Utc::now(),
        )
        .await
        .unwrap();
    worker
}

async fn register_hatchery(store: &MemoryStore, name: &str) -> convoy_core::worker::Hatchery {
    let token = RegistrationToken::new("builders", TokenScope::Persistent);
    store.add_token(token.clone()).await.unwrap();
    store
        .register_hatchery(
            HatcheryForm {
                name: name.to_string(),
                token: token.value,
                max_workers: 5,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn at_most_one_concurrent_take_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let job = store.enqueue(job_with(vec![])).await.unwrap();

    let mut workers = Vec::new();
    for i in 0..16 {
        workers.push(register_worker(&store, &format!("worker-{i}")).await);
    }

    let mut handles = Vec::new();
    for worker in workers {
        let store = store.clone();
        let job_id = job.id;
        handles.push(tokio::spawn(async move {
            store.take(job_id, worker.id, Utc::now()).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(taken) => {
                assert_eq!(taken.status, JobStatus::Building);
                wins += 1;
            }
            Err(Error::JobNotWaiting) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 15);
}

#[tokio::test]
async fn booking_is_exclusive_until_lease_expires() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let alpha = register_hatchery(&store, "alpha").await;
    let beta = register_hatchery(&store, "beta").await;

    let t0 = Utc::now();
    let lease = Duration::minutes(2);

    store.book(job.id, alpha.id, lease, t0).await.unwrap();
    assert!(matches!(
        store.book(job.id, beta.id, lease, t0).await,
        Err(Error::AlreadyBooked)
    ));

    // The holder may refresh its own lease.
    let refreshed = store
        .book(job.id, alpha.id, lease, t0 + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(refreshed.booked_by, Some(alpha.id));

    // Past the refreshed deadline the other hatchery wins the booking.
    let later = t0 + Duration::minutes(4);
    let rebooked = store.book(job.id, beta.id, lease, later).await.unwrap();
    assert_eq!(rebooked.booked_by, Some(beta.id));
}

#[tokio::test]
async fn expired_lease_requeues_with_no_residual_booking() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let hatchery = register_hatchery(&store, "alpha").await;

    let t0 = Utc::now();
    store
        .book(job.id, hatchery.id, Duration::minutes(2), t0)
        .await
        .unwrap();

    // Booked jobs are not pending.
    assert!(store
        .list_pending(&default_profile(), t0)
        .await
        .unwrap()
        .is_empty());

    let after_expiry = t0 + Duration::minutes(3);
    let pending = store
        .list_pending(&default_profile(), after_expiry)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, JobStatus::Waiting);
    assert_eq!(pending[0].booked_by, None);
    assert_eq!(pending[0].book_deadline, None);
}

#[tokio::test]
async fn released_booking_returns_job_to_the_pool() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let hatchery = register_hatchery(&store, "alpha").await;
    let other = register_hatchery(&store, "beta").await;

    let now = Utc::now();
    store
        .book(job.id, hatchery.id, Duration::minutes(2), now)
        .await
        .unwrap();

    // Only the holder may release.
    assert!(matches!(
        store.release(job.id, other.id).await,
        Err(Error::Forbidden(_))
    ));

    store.release(job.id, hatchery.id).await.unwrap();
    let pending = store.list_pending(&default_profile(), now).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn listing_filters_by_requirement_subset_and_orders_by_age() {
    let store = MemoryStore::new();

    let matching_old = store.enqueue(job_with(vec![])).await.unwrap();
    let matching_new = store
        .enqueue(job_with(vec![Requirement::binary("git")]))
        .await
        .unwrap();
    let unmatched = store
        .enqueue(job_with(vec![Requirement::binary("bazel")]))
        .await
        .unwrap();
    let wrong_model = store
        .enqueue(job_with(vec![Requirement::model("centos-7")]))
        .await
        .unwrap();

    let pending = store
        .list_pending(&default_profile(), Utc::now())
        .await
        .unwrap();
    let ids: Vec<_> = pending.iter().map(|j| j.id).collect();

    assert_eq!(ids, vec![matching_old.id, matching_new.id]);
    assert!(!ids.contains(&unmatched.id));
    assert!(!ids.contains(&wrong_model.id));

    // The unmatchable job stays visible to a capable profile forever; it is
    // a diagnostic concern, not a deadline.
    let stale = store
        .stale_pending(Duration::zero(), Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert!(stale.iter().any(|j| j.id == unmatched.id));
}

#[tokio::test]
async fn booked_job_is_takeable_only_by_the_spawning_hatcherys_worker() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let hatchery = register_hatchery(&store, "alpha").await;

    let now = Utc::now();
    store
        .book(job.id, hatchery.id, Duration::minutes(2), now)
        .await
        .unwrap();

    // A stranger worker (no hatchery lineage) cannot take a booked job.
    let stranger = register_worker(&store, "stranger").await;
    assert!(matches!(
        store.take(job.id, stranger.id, now).await,
        Err(Error::JobNotWaiting)
    ));

    // A worker registered through the hatchery's spawn token can.
    let spawn_token = RegistrationToken::for_spawn("builders", hatchery.id, Some(job.id));
    store.add_token(spawn_token.clone()).await.unwrap();
    let (spawned, booked_job) = store
        .register_worker(
            RegistrationForm {
                name: "spawned".to_string(),
                token: spawn_token.value,
                model: "debian-12".to_string(),
                capabilities: vec![],
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(booked_job, Some(job.id));

    let taken = store.take(job.id, spawned.id, now).await.unwrap();
    assert_eq!(taken.status, JobStatus::Building);
    assert_eq!(taken.worker_id, Some(spawned.id));
    assert_eq!(taken.booked_by, None);
}

#[tokio::test]
async fn single_use_tokens_register_exactly_one_worker() {
    let store = MemoryStore::new();
    let hatchery = register_hatchery(&store, "alpha").await;
    let token = RegistrationToken::for_spawn("builders", hatchery.id, None);
    store.add_token(token.clone()).await.unwrap();

    let form = |name: &str| RegistrationForm {
        name: name.to_string(),
        token: token.value.clone(),
        model: "debian-12".to_string(),
        capabilities: vec![],
    };

    store.register_worker(form("first"), Utc::now()).await.unwrap();
    assert!(matches!(
        store.register_worker(form("second"), Utc::now()).await,
        Err(Error::InvalidToken)
    ));
}

#[tokio::test]
async fn terminal_status_is_final() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let worker = register_worker(&store, "worker").await;

    let now = Utc::now();
    store.take(job.id, worker.id, now).await.unwrap();
    let finished = store
        .report_result(
            job.id,
            worker.id,
            JobResult {
                status: JobStatus::Success,
                duration_ms: 1200,
                remote_time: now,
            },
        )
        .await
        .unwrap();
    assert_eq!(finished.status, JobStatus::Success);

    // No stop, take, or booking is accepted after a terminal result.
    assert!(matches!(store.stop(job.id).await, Err(Error::JobNotWaiting)));
    let hatchery = register_hatchery(&store, "late").await;
    assert!(matches!(
        store.book(job.id, hatchery.id, Duration::minutes(2), now).await,
        Err(Error::JobNotWaiting)
    ));
    let late_worker = register_worker(&store, "late-worker").await;
    assert!(matches!(
        store.take(job.id, late_worker.id, now).await,
        Err(Error::JobNotWaiting)
    ));
}

#[tokio::test]
async fn result_from_a_non_owner_is_forbidden() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let owner = register_worker(&store, "owner").await;
    let impostor = register_worker(&store, "impostor").await;

    let now = Utc::now();
    store.take(job.id, owner.id, now).await.unwrap();

    assert!(matches!(
        store
            .report_result(
                job.id,
                impostor.id,
                JobResult {
                    status: JobStatus::Success,
                    duration_ms: 1,
                    remote_time: now,
                },
            )
            .await,
        Err(Error::Forbidden(_))
    ));
}

#[tokio::test]
async fn lost_worker_forces_fail_and_is_reclaimed() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let worker = register_worker(&store, "doomed").await;

    let t0 = Utc::now();
    store.take(job.id, worker.id, t0).await.unwrap();

    // Silent for longer than the timeout.
    let reclaimed = store
        .reap_lost_workers(Duration::seconds(60), t0 + Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(reclaimed, vec![worker.id]);

    let failed = store.job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Fail);
    assert!(store.worker(worker.id).await.is_err());

    let logs = store.logs(job.id).await.unwrap();
    assert!(logs.iter().any(|l| l.value.contains("heartbeat timeout")));
}

#[tokio::test]
async fn stopped_job_is_observed_by_status_poll() {
    let store = MemoryStore::new();
    let job = store.enqueue(job_with(vec![])).await.unwrap();
    let worker = register_worker(&store, "worker").await;

    store.take(job.id, worker.id, Utc::now()).await.unwrap();
    store.stop(job.id).await.unwrap();

    assert_eq!(store.job(job.id).await.unwrap().status, JobStatus::Stopped);
}

#[tokio::test]
async fn end_to_end_success_scenario() {
    let store = MemoryStore::new();
    let profile = default_profile();

    // The run controller publishes one job with no requirements.
    let job = store.enqueue(job_with(vec![])).await.unwrap();

    // A hatchery finds it and books it.
    let hatchery = register_hatchery(&store, "alpha").await;
    let now = Utc::now();
    let pending = store.list_pending(&profile, now).await.unwrap();
    assert_eq!(pending.len(), 1);
    store
        .book(job.id, hatchery.id, Duration::minutes(2), now)
        .await
        .unwrap();

    // It spawns a worker with a single-use token bound to the booking.
    let token = RegistrationToken::for_spawn("builders", hatchery.id, Some(job.id));
    store.add_token(token.clone()).await.unwrap();
    let (worker, booked) = store
        .register_worker(
            RegistrationForm {
                name: "spawned".to_string(),
                token: token.value,
                model: "debian-12".to_string(),
                capabilities: vec![],
            },
            now,
        )
        .await
        .unwrap();

    // The worker takes its booked job and reports progress.
    let taken = store.take(booked.unwrap(), worker.id, now).await.unwrap();
    assert_eq!(taken.status, JobStatus::Building);

    store
        .append_log(job.id, LogLine::new(0, "make: all targets up to date"))
        .await
        .unwrap();

    let finished = store
        .report_result(
            job.id,
            worker.id,
            JobResult {
                status: JobStatus::Success,
                duration_ms: 842,
                remote_time: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(finished.status, JobStatus::Success);

    // The job is never listed as pending again.
    assert!(store
        .list_pending(&profile, Utc::now() + Duration::hours(1))
        .await
        .unwrap()
        .is_empty());
}
