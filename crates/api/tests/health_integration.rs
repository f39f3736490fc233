//! Integration tests for health and metrics endpoints.

mod common;

use axum::http::StatusCode;
use common::{create_test_app, get_request, parse_response_body, post_request};
use domain::models::JobRunState;
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
async fn test_health_unavailable_before_start() {
    let app = create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = parse_response_body(response).await;
    assert_eq!(body["scheduler"], "STOPPED");
}

#[tokio::test]
async fn test_health_ok_while_running() {
    let app = create_test_app();
    app.register_stub("orders", Duration::ZERO);
    app.scheduler.start().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["scheduler"], "RUNNING");
    assert_eq!(body["orders"], "PENDING");

    app.scheduler.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_health_degrades_on_failed_job() {
    let app = create_test_app();
    app.register_failing("orders");
    app.scheduler.start().unwrap();

    app.router
        .clone()
        .oneshot(post_request("/api/v1/jobs/orders/run"))
        .await
        .unwrap();
    app.wait_for_state("orders", JobRunState::Error).await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = parse_response_body(response).await;
    assert_eq!(body["orders"], "ERROR");

    app.scheduler.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_liveness() {
    let app = create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(get_request("/health/live"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_job_metrics_snapshot() {
    let app = create_test_app();
    app.register_stub("orders", Duration::from_millis(10));

    app.router
        .clone()
        .oneshot(post_request("/api/v1/jobs/orders/run"))
        .await
        .unwrap();
    app.wait_for_state("orders", JobRunState::Complete).await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    let orders = &body["orders"];
    assert_eq!(orders["totalRuns"], 1);
    assert_eq!(orders["failedRuns"], 0);
    assert!(orders["lastRunDurationMs"].as_u64().unwrap() >= 10);
    assert_eq!(orders["totalBackupSize"], 7);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(get_request("/health/live"))
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}
