#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use pushtimer_server::partition::PartitionKey;
use pushtimer_server::routes::{AppState, build_router};

use common::{StubTransport, memory_router};

fn app() -> axum::Router {
    let router = memory_router(StubTransport::answering(201), Duration::from_secs(60));
    build_router(AppState { router })
}

/// Send a request to `app` and return (status, body text).
async fn send(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn subscription(endpoint: &str) -> Value {
    json!({
        "endpoint": endpoint,
        "keys": { "p256dh": "BNcRdreALRFXTkOOUHK1EtK2", "auth": "tBHItJI5svbpez7KI4CCXg" }
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, text) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn greet_echoes_name() {
    let (status, text) = send(&app(), Method::GET, "/greet/ada", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Hello, ada!");
}

#[tokio::test]
async fn subscribe_registers_and_arms_partition() {
    let app = app();
    let endpoint = "https://fcm.googleapis.com/fcm/send/abc123";

    let (status, text) = send(&app, Method::POST, "/subscribe", Some(subscription(endpoint))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&text).unwrap();
    let expected_key = PartitionKey::from_endpoint(endpoint);
    assert_eq!(body["success"], true);
    assert_eq!(body["key"], expected_key.as_str());

    let (status, text) = send(
        &app,
        Method::GET,
        &format!("/partitions/{}", expected_key.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let view: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(view["key"], expected_key.as_str());
    assert_eq!(view["subscribed"], true);
    assert!(view["alarm_at_ms"].is_i64());
}

#[tokio::test]
async fn unknown_partition_reports_empty_state() {
    let (status, text) = send(&app(), Method::GET, "/partitions/nobody", None).await;
    assert_eq!(status, StatusCode::OK);
    let view: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(view["subscribed"], false);
    assert!(view["alarm_at_ms"].is_null());
}

#[tokio::test]
async fn subscribe_rejects_invalid_endpoint() {
    for endpoint in ["", "not a url", "ftp://push.example/x"] {
        let (status, text) =
            send(&app(), Method::POST, "/subscribe", Some(subscription(endpoint))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "endpoint {endpoint:?}");
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn subscribe_rejects_empty_keys() {
    let body = json!({
        "endpoint": "https://push.example/a",
        "keys": { "p256dh": "BNcR", "auth": "" }
    });
    let (status, text) = send(&app(), Method::POST, "/subscribe", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(text.contains("keys.auth"));
}

#[tokio::test]
async fn subscribe_rejects_malformed_body() {
    let body = json!({ "endpoint": "https://push.example/a" });
    let (status, _) = send(&app(), Method::POST, "/subscribe", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app(), Method::POST, "/subscribe", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_partition_key_is_rejected() {
    let uri = format!("/partitions/{}", "k".repeat(500));
    let (status, _) = send(&app(), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cors_preflight_is_allowed() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/subscribe")
                .header("origin", "https://app.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}
