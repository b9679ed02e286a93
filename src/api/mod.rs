//! HTTP API server

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod state;

pub use state::AppState;

/// Build the API router using the provided application state.
///
/// Any path other than `/health` is treated as an aggregation query, so
/// `/?job=api` and `/metrics?job=api` behave the same.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .fallback(handlers::aggregate)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
