//! Metrics and health endpoint tests
//!
//! Requests go through the full router with `oneshot`, against a manager
//! backed by the in-process fake.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use ara_mail_dispatch::api::{create_router, AppState};

use common::{open_manager, FakeState};

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let state = FakeState::new();
    let manager = open_manager(&state).await;
    let app = create_router(AppState::new(manager.clone()));

    let (status, content_type, body) = get(app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain; version=0.0.4"));
    assert!(body.contains("ara_dispatch_db_connection_status"));
    assert!(body.contains("ara_dispatch_db_active_operations"));

    manager.close().await;
}

#[tokio::test]
async fn test_health_reports_connected_manager() {
    let state = FakeState::new();
    let manager = open_manager(&state).await;
    manager.begin_operation();
    let app = create_router(AppState::new(manager.clone()));

    let (status, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"]["status"], "connected");
    assert_eq!(json["database"]["reachable"], true);
    assert_eq!(json["database"]["active_operations"], 1);
    assert!(json["database"].get("last_reconnect").is_none());

    manager.end_operation();
    manager.close().await;
}

#[tokio::test]
async fn test_health_reports_closed_manager_as_degraded() {
    let state = FakeState::new();
    let manager = open_manager(&state).await;
    manager.close().await;
    let app = create_router(AppState::new(manager.clone()));

    let (status, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["database"]["status"], "disconnected");
    assert_eq!(json["database"]["reachable"], false);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let state = FakeState::new();
    let manager = open_manager(&state).await;
    let app = create_router(AppState::new(manager.clone()));

    let (status, _, _) = get(app, "/stats").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    manager.close().await;
}
