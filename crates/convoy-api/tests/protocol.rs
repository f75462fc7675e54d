//! Queue protocol behavior through the HTTP surface.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use convoy_api::{AppState, routes};
use convoy_core::job::{JobRun, Step};
use convoy_core::token::{RegistrationToken, TokenScope};
use convoy_core::NodeRunId;
use convoy_store::{FsObjectStore, JobStore, MemoryStore, RegistryStore};

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    job: JobRun,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let objects = FsObjectStore::new(
        std::env::temp_dir()
            .join("convoy-api-test")
            .join(uuid::Uuid::new_v4().to_string()),
    );

    let job = store
        .enqueue(JobRun::new(
            NodeRunId::new(),
            vec![],
            vec![Step::new("build", "make")],
        ))
        .await
        .unwrap();

    let app = routes::router(AppState::new(store.clone(), Arc::new(objects)));
    Harness { app, store, job }
}

async fn issue_token(store: &MemoryStore) -> String {
    let token = RegistrationToken::new("builders", TokenScope::Persistent);
    store.add_token(token.clone()).await.unwrap();
    token.value
}

fn post_json(uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with(uri: &str, bearer: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_worker_http(app: &Router, token: &str, name: &str) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::post("/workers/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "name": name,
                        "token": token,
                        "model": "debian-12",
                        "capabilities": [],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

async fn register_hatchery_http(app: &Router, token: &str, name: &str) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::post("/hatcheries/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "name": name, "token": token, "max_workers": 5 }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn health_needs_no_auth() {
    let h = harness().await;
    let response = h
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn listing_requires_an_identity() {
    let h = harness().await;

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // An issued-but-unregistered token is not a queue reader either.
    let token = issue_token(&h.store).await;
    let response = h.app.oneshot(get_with("/queue", &token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn take_without_worker_identity_is_forbidden() {
    let h = harness().await;
    let token = issue_token(&h.store).await;

    let response = h
        .app
        .oneshot(post_json(
            &format!("/queue/{}/take", h.job.id),
            &token,
            json!({ "booked_job_id": null, "time": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let h = harness().await;

    let token_a = issue_token(&h.store).await;
    let token_b = issue_token(&h.store).await;
    register_hatchery_http(&h.app, &token_a, "alpha").await;
    register_hatchery_http(&h.app, &token_b, "beta").await;

    let uri = format!("/queue/{}/book", h.job.id);
    let response = h
        .app
        .clone()
        .oneshot(post_json(&uri, &token_a, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .app
        .oneshot(post_json(&uri, &token_b, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn end_to_end_protocol_over_http() {
    let h = harness().await;

    // Hatchery registers and sees the pending job.
    let hatchery_token = issue_token(&h.store).await;
    register_hatchery_http(&h.app, &hatchery_token, "alpha").await;

    let response = h
        .app
        .clone()
        .oneshot(get_with("/queue", &hatchery_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let pending = json_body(response).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    // It books the job.
    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/book", h.job.id),
            &hatchery_token,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // It reports its provisioning attempt.
    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/spawn/infos", h.job.id),
            &hatchery_token,
            json!([{ "message": "spawning worker alpha-1 on mock" }]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The spawned worker registers with a token bound to the booking.
    let hatchery = h.store.hatchery_by_token(&hatchery_token).await.unwrap();
    let spawn_token = RegistrationToken::for_spawn("builders", hatchery.id, Some(h.job.id));
    h.store.add_token(spawn_token.clone()).await.unwrap();
    let registered = register_worker_http(&h.app, &spawn_token.value, "alpha-1").await;
    assert_eq!(
        registered["booked_job_id"].as_str().unwrap(),
        h.job.id.to_string()
    );

    // It takes the booked job.
    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/take", h.job.id),
            &spawn_token.value,
            json!({ "booked_job_id": h.job.id, "time": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let taken = json_body(response).await;
    assert_eq!(taken["status"], "Building");

    // Logs and a terminal result.
    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/log", h.job.id),
            &spawn_token.value,
            json!({ "step_order": 0, "value": "make: nothing to be done" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/result", h.job.id),
            &spawn_token.value,
            json!({ "status": "Success", "duration_ms": 842, "remote_time": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let finished = json_body(response).await;
    assert_eq!(finished["status"], "Success");

    // Nothing is pending anymore.
    let response = h
        .app
        .oneshot(get_with("/queue", &hatchery_token))
        .await
        .unwrap();
    let pending = json_body(response).await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reports_from_a_non_owner_are_forbidden() {
    let h = harness().await;

    let owner_token = issue_token(&h.store).await;
    let other_token = issue_token(&h.store).await;
    register_worker_http(&h.app, &owner_token, "owner").await;
    register_worker_http(&h.app, &other_token, "other").await;

    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/take", h.job.id),
            &owner_token,
            json!({ "booked_job_id": null, "time": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .app
        .oneshot(post_json(
            &format!("/queue/{}/log", h.job.id),
            &other_token,
            json!({ "step_order": 0, "value": "not my job" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reports_land_on_the_node_run() {
    let h = harness().await;

    let token = issue_token(&h.store).await;
    register_worker_http(&h.app, &token, "worker").await;
    let response = h
        .app
        .clone()
        .oneshot(post_json(
            &format!("/queue/{}/take", h.job.id),
            &token,
            json!({ "booked_job_id": null, "time": Utc::now() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = json!({
        "total": 0, "ok": 0, "ko": 0, "skipped": 0,
        "suites": [
            { "name": "suite-1", "total": 0,
              "cases": [{ "name": "case-1", "status": "OK" }] },
            { "name": "suite-2", "total": 0,
              "cases": [{ "name": "case-1", "status": "KO",
                          "failures": [{ "value": "Fail", "kind": "assertion", "message": "boom" }] }] },
        ],
    });
    let response = h
        .app
        .oneshot(post_json(
            &format!("/queue/{}/test", h.job.id),
            &token,
            report,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stored = json_body(response).await;
    assert_eq!(stored["total"], 2);
    assert_eq!(stored["ok"], 1);
    assert_eq!(stored["ko"], 1);
}
