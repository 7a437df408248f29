use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/session/start", post(handlers::start_session))
        .route("/session/stop", post(handlers::stop_session))
        .route("/session/status", get(handlers::get_session_status))
        // Transcript
        .route(
            "/transcript",
            get(handlers::get_transcript).delete(handlers::clear_transcript),
        )
        // Usage gate
        .route("/usage", get(handlers::get_usage))
        .route("/usage/upgrade", post(handlers::upgrade_usage))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
