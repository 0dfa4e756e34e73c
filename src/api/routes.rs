//! Router assembly.

use crate::api::handlers::{health, metrics_handler, AppState};
use crate::api::{imgbb, openai, stability};
use crate::core::middleware::{
    request_id_middleware, well_known_filter_middleware, MetricsMiddleware,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Headroom above the per-file upload limit for form fields and multipart framing.
const BODY_LIMIT_HEADROOM: usize = 1024 * 1024;

/// Build the router with every integration route and the middleware stack.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(BODY_LIMIT_HEADROOM);

    let api_routes = Router::new()
        .route("/api/openai/chat", post(openai::sketch_chat))
        .route("/api/chat", post(openai::prompt_chat))
        .route("/api/openai/completion", post(openai::completion))
        .route("/api/openai/describe", post(openai::describe))
        .route("/api/imgbb/upload", post(imgbb::upload))
        .route("/api/stability/generate", post(stability::generate))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        // Outermost so well-known requests never reach routing or tracing
        .layer(axum::middleware::from_fn(well_known_filter_middleware))
}
