//! Integration tests for the HTTP API, driven through the router with
//! in-process collaborators.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use reelsmith_pipeline::{
    Controller, JobId, JobStatus,
    testing::{self, FakeSpeech},
};
use reelsmith_server::{AppState, HealthInfo, build_router, rate_limit::RateLimit};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tower::util::ServiceExt; // for `oneshot` method

struct TestApp {
    router: axum::Router,
    controller: Controller,
    _root: tempfile::TempDir,
}

fn setup_app(services: reelsmith_pipeline::Collaborators) -> TestApp {
    setup_limited_app(services, RateLimit::default())
}

fn setup_limited_app(services: reelsmith_pipeline::Collaborators, limit: RateLimit) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();
    let health = HealthInfo {
        language_model: true,
        footage: true,
        speech: true,
        ffmpeg: true,
        ..HealthInfo::default()
    };
    TestApp {
        router: build_router(AppState::new(controller.clone(), health).with_rate_limit(limit)),
        controller,
        _root: root,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn wait_terminal(controller: &Controller, id: JobId) -> JobStatus {
    let mut status = controller.watch(id).unwrap();
    let done = tokio::time::timeout(Duration::from_secs(10), status.wait_for(JobStatus::is_terminal))
        .await
        .expect("job did not finish")
        .expect("status channel closed")
        .clone();
    done
}

async fn start(app: &TestApp, topic: &str) -> JobId {
    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/generate", json!({ "topic": topic })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = extract_json(response.into_body()).await;
    body["job_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn health_reports_configuration() {
    let app = setup_app(testing::collaborators());

    let response = app.router.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ffmpeg"], true);
    assert_eq!(body["publishing"], false);
    assert!(body["active_job_id"].is_null());
}

#[tokio::test]
async fn generated_video_can_be_fetched() {
    let app = setup_app(testing::collaborators());
    let id = start(&app, "history of coffee").await;
    let JobStatus::Succeeded(output) = wait_terminal(&app.controller, id).await else {
        panic!("job did not succeed");
    };
    let on_disk = std::fs::read(output.video_path.unwrap()).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/jobs/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"]["state"], "succeeded");
    assert_eq!(body["percentage"], 100);
    assert_eq!(body["total_steps"], 5);
    assert_eq!(body["topic"], "history of coffee");

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/jobs/{id}/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), on_disk.as_slice());
}

#[tokio::test]
async fn second_job_is_rejected_while_one_runs() {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut services = testing::collaborators();
    services.speech = Arc::new(FakeSpeech::new(8.0).gated(Arc::clone(&entered), Arc::clone(&gate)));
    let app = setup_app(services);

    let first = start(&app, "history of coffee").await;
    tokio::time::timeout(Duration::from_secs(10), entered.notified())
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/generate", json!({ "topic": "volcanoes" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["active_job_id"], first.to_string());

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/jobs/{first}")))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"]["state"], "running");
    assert_eq!(body["status"]["stage"], "narration");
    assert_eq!(body["step"], 3);

    let response = app
        .router
        .clone()
        .oneshot(post_json(&format!("/api/jobs/{first}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["result"], "requested");

    gate.notify_one();
    assert_eq!(
        wait_terminal(&app.controller, first).await,
        JobStatus::Cancelled {
            stage: reelsmith_pipeline::Stage::Subtitles
        }
    );

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/jobs/{first}/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_topic_is_a_bad_request() {
    let app = setup_app(testing::collaborators());

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/generate", json!({ "topic": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.controller.active().is_none());
}

#[tokio::test]
async fn publishing_without_a_host_is_a_bad_request() {
    let app = setup_app(testing::collaborators());

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/generate",
            json!({ "topic": "history of coffee", "publish": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let app = setup_app(testing::collaborators());

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/jobs/{}", JobId::new())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router
        .clone()
        .oneshot(post_json(&format!("/api/jobs/{}/cancel", JobId::new()), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.router.clone().oneshot(get("/api/jobs/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repeated_submissions_are_throttled() {
    let limit = RateLimit {
        max_requests: 2,
        window: Duration::from_secs(600),
    };
    let app = setup_limited_app(testing::collaborators(), limit);

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/generate", json!({ "topic": " " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/generate", json!({ "topic": "history of coffee" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].as_str().unwrap().contains("at most 2"));
    assert!(app.controller.active().is_none());

    // Other endpoints are not throttled.
    let response = app.router.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
