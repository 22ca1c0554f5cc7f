use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        // Search
        .route("/v1/prospects/search", post(handlers::search_prospects))
        .route("/v1/prospects/suggest", get(handlers::suggest_values))
        // Sync operations
        .route("/v1/sync/status", get(handlers::sync_status))
        .route("/v1/sync/resync", post(handlers::trigger_resync))
        // Metrics
        .route("/metrics", get(handlers::metrics_endpoint))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}
