//! Integration tests for the operational surface of the server.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use studio_proxy_rust::{build_router, core::init_metrics, AppConfig, AppState};
use tower::ServiceExt;

fn create_test_app() -> Router {
    init_metrics();
    let state = AppState::new(AppConfig::default()).expect("Failed to build HTTP client");
    build_router(Arc::new(state))
}

async fn read_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&read_bytes(response).await).unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(read_bytes(response).await).unwrap();
    assert!(text.contains("studio_proxy_"));
}

#[tokio::test]
async fn test_well_known_request_is_empty_404() {
    let app = create_test_app();

    for method in ["GET", "POST"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/.well-known/appspecific/com.chrome.devtools.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(read_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn test_every_response_carries_request_id() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("missing x-request-id")
        .to_str()
        .unwrap();
    assert_eq!(request_id.len(), 36);
}

#[tokio::test]
async fn test_integration_routes_reject_get() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/openai/completion")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unconfigured_provider_fails_without_leaking_settings() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/openai/describe")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"imageDataUrl": "data:image/png;base64,AA=="}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_slice(&read_bytes(response).await).unwrap();
    assert_eq!(
        body,
        json!({"error": "Server configuration error: openai is not configured"})
    );
}
