//! Shared application state and operational endpoints.

use crate::core::config::AppConfig;
use crate::core::{AppError, Result};
use axum::{
    http::{header, StatusCode},
    response::Response,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> reqwest::Result<Self> {
        let http_client = create_http_client(&config)?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Total deadline applied to buffered upstream calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

/// Create the HTTP client shared by every upstream integration.
///
/// Only the connect timeout lives on the client; buffered calls set their
/// own total deadline and the streaming relay enforces an idle timeout.
pub fn create_http_client(config: &AppConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

/// Liveness check.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Prometheus metrics endpoint.
#[tracing::instrument]
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(buffer.into())
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_metrics_handler_exposes_registry() {
        crate::core::metrics::init_metrics();
        let response = metrics_handler().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("studio_proxy_client_disconnects_total"));
    }

    #[test]
    fn test_app_state_builds_client() {
        let state = AppState::new(AppConfig::default()).unwrap();
        assert_eq!(state.request_timeout(), Duration::from_secs(60));
    }
}
