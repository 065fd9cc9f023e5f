//! HTTP routing tests: the management API and the public ping endpoints,
//! exercised through the router with `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use deadman::config::DatabaseConfig;
use deadman::database::Database;
use deadman::models::JobState;
use deadman::services::MonitorService;
use deadman::sweeper::SweeperService;
use deadman::web::{build_router, AppState};

async fn test_app() -> (Router, Database) {
    let database = Database::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
    })
    .await
    .unwrap();
    database.migrate().await.unwrap();

    let state = AppState {
        database: database.clone(),
        monitor: MonitorService::new(database.clone()),
        sweeper: SweeperService::new(database.clone(), std::time::Duration::from_secs(60)),
    };
    (build_router(state), database)
}

// Helper function to send requests to the app
async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn job_payload() -> Value {
    json!({
        "name": "nightly-backup",
        "schedule": { "kind": "interval", "seconds": 600 },
        "expected_run_time_secs": 30,
        "buffer_time_secs": 60
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app().await;
    let (status, body) = send_request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_list_jobs() {
    let (app, _) = test_app().await;

    let (status, created) =
        send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "nightly-backup");
    assert_eq!(created["state"], "ready");
    assert_eq!(created["public_id"].as_str().unwrap().len(), 12);

    let (status, jobs) = send_request(&app, Method::GET, "/api/v1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_job_with_malformed_cron_is_rejected() {
    let (app, _) = test_app().await;

    let payload = json!({
        "name": "reports",
        "schedule": { "kind": "cron", "expression": "* * *" },
        "expected_run_time_secs": 30
    });
    let (status, body) = send_request(&app, Method::POST, "/api/v1/jobs", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("cron"));
}

#[tokio::test]
async fn test_ping_unknown_token_is_not_found() {
    let (app, _) = test_app().await;
    let (status, _) = send_request(&app, Method::POST, "/ping/FFFFFFFFFFFF/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ping_end_without_a_run_conflicts() {
    let (app, _) = test_app().await;

    let (_, created) = send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    let public_id = created["public_id"].as_str().unwrap();

    let (status, _) =
        send_request(&app, Method::POST, &format!("/ping/{public_id}/end"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_ping_lifecycle_over_http() {
    let (app, database) = test_app().await;

    let (_, created) = send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    let id = created["id"].as_str().unwrap().parse().unwrap();
    let public_id = created["public_id"].as_str().unwrap();

    // Bring the next occurrence up to now so the guard passes
    let mut job = database.get_job(id).await.unwrap().unwrap();
    job.next_scheduled_time = Utc::now();
    assert!(database.update_job(&job).await.unwrap());

    let (status, body) =
        send_request(&app, Method::POST, &format!("/ping/{public_id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["state"], "running");

    let (status, body) =
        send_request(&app, Method::POST, &format!("/ping/{public_id}/end"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");

    let job = database.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Active);
}

#[tokio::test]
async fn test_early_ping_reports_unaccepted() {
    let (app, _) = test_app().await;

    let (_, created) = send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    let public_id = created["public_id"].as_str().unwrap();

    // Fresh job: the only occurrence is a full interval away
    let (status, body) =
        send_request(&app, Method::POST, &format!("/ping/{public_id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    assert_eq!(body["state"], "ready");
}

#[tokio::test]
async fn test_channels_subscriptions_and_sweep() {
    let (app, _) = test_app().await;

    let (_, created) = send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    let job_id = created["id"].as_str().unwrap();

    let (status, channel) = send_request(
        &app,
        Method::POST,
        "/api/v1/channels",
        Some(json!({ "name": "ops-log", "kind": "log" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let channel_id = channel["id"].as_str().unwrap();

    let (status, binding) = send_request(
        &app,
        Method::POST,
        &format!("/api/v1/jobs/{job_id}/subscriptions/{channel_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(binding["job_id"].as_str().unwrap(), job_id);

    let (status, summary) = send_request(&app, Method::POST, "/api/v1/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["jobs_checked"], 1);
    assert_eq!(summary["expired"], 0);

    let (status, _) = send_request(
        &app,
        Method::DELETE,
        &format!("/api/v1/jobs/{job_id}/subscriptions/{channel_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
        send_request(&app, Method::DELETE, &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, jobs) = send_request(&app, Method::GET, "/api/v1/jobs", None).await;
    assert!(jobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_force_endpoints() {
    let (app, _) = test_app().await;

    let (_, created) = send_request(&app, Method::POST, "/api/v1/jobs", Some(job_payload())).await;
    let job_id = created["id"].as_str().unwrap();

    let (status, body) = send_request(
        &app,
        Method::POST,
        &format!("/api/v1/jobs/{job_id}/force-run"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (status, body) = send_request(
        &app,
        Method::POST,
        &format!("/api/v1/jobs/{job_id}/force-active"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");
}
