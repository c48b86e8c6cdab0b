#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use maintenance_api::config::ServerConfig;
use maintenance_api::router::build_app_router;
use maintenance_api::state::AppState;
use maintenance_messaging::{BrokerConfig, Publisher};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://127.0.0.1:8000".to_string()],
        request_timeout_secs: 30,
        broker: BrokerConfig::default(),
    }
}

/// Build the full application router around `publisher`, with the same
/// middleware stack production uses.
pub fn build_test_app(publisher: Arc<dyn Publisher>) -> Router {
    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        publisher,
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, "application/json", body.to_string()).await
}

/// POST an arbitrary body with the given content type.
pub async fn post_raw(
    app: Router,
    uri: &str,
    content_type: &str,
    body: impl Into<Body>,
) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
