//! Artifact upload, listing, and download through the HTTP surface.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use convoy_api::{AppState, routes};
use convoy_core::NodeRunId;
use convoy_core::artifact::content_checksum;
use convoy_core::job::{JobRun, Step};
use convoy_core::token::{RegistrationToken, TokenScope};
use convoy_core::worker::RegistrationForm;
use convoy_store::{JobStore, MemoryStore, RegistryStore};

const BOUNDARY: &str = "x-convoy-test-boundary";

struct Harness {
    app: Router,
    job: JobRun,
    worker_token: String,
    user_token: String,
}

/// Store seeded with one Building job owned by a registered worker.
async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let objects = convoy_store::FsObjectStore::new(
        std::env::temp_dir()
            .join("convoy-artifact-http-test")
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

    let worker_token = RegistrationToken::new("builders", TokenScope::Persistent);
    store.add_token(worker_token.clone()).await.unwrap();
    let (worker, _) = store
        .register_worker(
            RegistrationForm {
                name: "worker".to_string(),
                token: worker_token.value.clone(),
                model: "debian-12".to_string(),
                capabilities: vec![],
            },
            Utc::now(),
        )
        .await
        .unwrap();
    store.take(job.id, worker.id, Utc::now()).await.unwrap();

    let user_token = RegistrationToken::new("builders", TokenScope::Persistent);
    store.add_token(user_token.clone()).await.unwrap();

    let app = routes::router(AppState::new(store, Arc::new(objects)));
    Harness {
        app,
        job,
        worker_token: worker_token.value,
        user_token: user_token.value,
    }
}

fn multipart_upload(
    uri: &str,
    bearer: &str,
    name: &str,
    declared_size: usize,
    declared_md5: &str,
    content: &[u8],
) -> Request<Body> {
    let mut body = Vec::new();
    for (field, value) in [
        ("size", declared_size.to_string()),
        ("perm", "420".to_string()),
        ("md5sum", declared_md5.to_string()),
    ] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upload_list_download_round_trip() {
    let h = harness().await;
    let content = b"Hi, I am foo";

    let response = h
        .app
        .clone()
        .oneshot(multipart_upload(
            &format!("/queue/{}/artifact/latest", h.job.id),
            &h.worker_token,
            "myartifact",
            content.len(),
            &content_checksum(content),
            content,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded = json_body(response).await;
    assert_eq!(uploaded["name"], "myartifact");
    assert_eq!(uploaded["size"], 12);

    // Listing shows exactly one artifact, metadata only.
    let response = h
        .app
        .clone()
        .oneshot(
            Request::get(format!("/node-runs/{}/artifacts", h.job.node_run_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", h.user_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["name"], "myartifact");
    let artifact_id = listed[0]["id"].as_str().unwrap().to_string();

    // Download returns the exact bytes.
    let response = h
        .app
        .oneshot(
            Request::get(format!("/artifacts/{artifact_id}/download"))
                .header(header::AUTHORIZATION, format!("Bearer {}", h.user_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Hi, I am foo");
}

#[tokio::test]
async fn upload_with_wrong_declared_size_is_rejected() {
    let h = harness().await;
    let content = b"Hi, I am foo";

    let response = h
        .app
        .oneshot(multipart_upload(
            &format!("/queue/{}/artifact/latest", h.job.id),
            &h.worker_token,
            "myartifact",
            content.len() - 1,
            &content_checksum(content),
            content,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_without_a_known_token_is_unauthorized() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(
            Request::get(format!("/node-runs/{}/artifacts", h.job.node_run_id))
                .header(header::AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
