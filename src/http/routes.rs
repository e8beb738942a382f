use super::handlers;
use super::state::AppState;
use super::ws;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/v1/guide/health", get(handlers::health_check))
        // Streaming channel
        .route("/v1/guide/stream", get(ws::stream))
        // Identification
        .route("/v1/guide/identify", post(handlers::identify))
        // Guide queries
        .route(
            "/v1/guide/devices/:device_id/guides",
            get(handlers::list_device_guides),
        )
        .route(
            "/v1/guide/guides/:guide_id/segments",
            get(handlers::get_guide_segments),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
