//! HTTP + WebSocket Server
//!
//! Exposes the execution scheduler over HTTP: scene listing, run
//! submission and status, cancellation, and a binary WebSocket stream of
//! progress for queued runs.

#![warn(missing_docs)]

pub mod api;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/scenes", get(api::list_scenes))
        .route("/runs", post(api::create_run))
        .route("/runs/:id", get(api::get_run))
        .route("/runs/:id/cancel", post(api::cancel_run));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_router)
        .route("/ws/runs/:id", get(ws::ws_run_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

async fn health_handler() -> &'static str {
    "OK"
}
