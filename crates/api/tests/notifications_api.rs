//! HTTP-level integration tests for `POST /api/v1/notifications/tasks`.
//!
//! The router runs with an in-memory publisher so no broker is needed.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{body_json, build_test_app, post_json, post_raw};
use maintenance_core::notification::TaskNotification;
use maintenance_messaging::{Classification, InMemoryPublisher, PublishError};
use serde_json::json;

const URI: &str = "/api/v1/notifications/tasks";

fn request(recipients: &[&str]) -> serde_json::Value {
    json!({
        "nickname": "tech",
        "task_id": "17",
        "task_date": "2024-03-01T09:30:00Z",
        "recipients": recipients,
    })
}

// ---------------------------------------------------------------------------
// Test: one message per recipient, published as a single batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publishes_one_notification_per_recipient() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let app = build_test_app(publisher.clone());

    let response = post_json(app, URI, request(&["a@example.com", "b@example.com"])).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["published"], 2);

    let batches = publisher.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].classification, Classification::Notification);
    let emails: Vec<String> = batches[0]
        .envelopes
        .iter()
        .map(|e| serde_json::from_slice::<TaskNotification>(&e.body).unwrap().email)
        .collect();
    assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
}

// ---------------------------------------------------------------------------
// Test: no recipients means nothing is published
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_recipient_list_publishes_nothing() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let app = build_test_app(publisher.clone());

    let response = post_json(app, URI, request(&[])).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["data"]["published"], 0);
    assert!(publisher.batches().is_empty());
}

// ---------------------------------------------------------------------------
// Test: invalid email is rejected before anything is published
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_recipient_returns_400() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let app = build_test_app(publisher.clone());

    let response = post_json(app, URI, request(&["a@example.com", "not-an-email"])).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert!(publisher.batches().is_empty());
}

#[tokio::test]
async fn empty_nickname_returns_400() {
    let app = build_test_app(Arc::new(InMemoryPublisher::new()));
    let mut body = request(&["a@example.com"]);
    body["nickname"] = json!("");

    let response = post_json(app, URI, body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: a publish failure fails the request
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_failure_returns_500() {
    let publisher = Arc::new(InMemoryPublisher::failing(PublishError::ConnectFailed(
        "connection refused".into(),
    )));
    let app = build_test_app(publisher);

    let response = post_json(app, URI, request(&["a@example.com"])).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INTERNAL_ERROR");
}

// ---------------------------------------------------------------------------
// Test: a body that is not the expected JSON is a 400 BAD_REQUEST
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_json_returns_400_bad_request() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let app = build_test_app(publisher.clone());

    let response = post_raw(app, URI, "application/json", "{\"nickname\":").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    assert!(publisher.batches().is_empty());
}

#[tokio::test]
async fn missing_field_returns_400_bad_request() {
    let app = build_test_app(Arc::new(InMemoryPublisher::new()));

    let response = post_json(app, URI, json!({ "nickname": "tech", "task_id": "17" })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("task_date"));
}

#[tokio::test]
async fn wrong_content_type_returns_400_bad_request() {
    let app = build_test_app(Arc::new(InMemoryPublisher::new()));

    let response = post_raw(app, URI, "text/plain", request(&[]).to_string()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}
