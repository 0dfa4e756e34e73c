//! HTTP middleware for request IDs, metrics, and well-known request filtering.

use crate::core::logging::{generate_request_id, REQUEST_ID};
use crate::core::metrics::get_metrics;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Response header carrying the per-request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Path prefix of browser-issued well-known requests (e.g. DevTools discovery).
const WELL_KNOWN_PREFIX: &str = "/.well-known/";

/// Short-circuit well-known requests with an empty 404.
///
/// These requests never reach routing, metrics, or any integration.
pub async fn well_known_filter_middleware(request: Request, next: Next) -> Response {
    if request.uri().path().starts_with(WELL_KNOWN_PREFIX) {
        tracing::trace!(path = %request.uri().path(), "Ignoring well-known request");
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap_or_default();
    }
    next.run(request).await
}

/// Assign a request ID, run the rest of the stack inside its scope, and echo
/// it back in the `x-request-id` header.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = generate_request_id();

    let mut response = REQUEST_ID
        .scope(request_id.clone(), next.run(request))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// This middleware:
    /// - Increments active request counter
    /// - Measures request duration
    /// - Records request count by status code
    /// - Logs request details
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request.uri().path().to_string();
        let method = request.method().to_string();

        let metrics = get_metrics();
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint])
            .observe(duration);
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .dec();

        let is_streaming = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/plain"))
            .unwrap_or(false);

        // For streams the handler returns once headers are ready, so this is time to first byte
        tracing::info!(
            method = %method,
            endpoint = %endpoint,
            status = %status_code,
            streaming = is_streaming,
            "Request handled in {:.3}s",
            duration
        );

        response
    }
}
