//! Router configuration for the worker-facing server.

use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the router with all worker protocol routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/work", get(handlers::get_work))
        .route("/work/:id", put(handlers::update_work))
        .route("/jobs/:job_id", get(handlers::get_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
