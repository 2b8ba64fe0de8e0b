//! HTTP control API
//!
//! Thin mapping of the orchestrator's inbound operations onto REST routes,
//! plus an SSE stream of orchestrator events.

pub mod handlers;
pub mod sse;

use crate::orchestrator::Orchestrator;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Queue
                .route("/queue", get(handlers::get_queue).post(handlers::enqueue))
                .route("/request", post(handlers::fetch_only))
                // Playback control
                .route("/vote", post(handlers::vote))
                .route("/playback/pause", post(handlers::pause))
                .route("/playback/skip", post(handlers::skip))
                .route("/playback/state", get(handlers::get_state))
                // Cache
                .route("/cache", get(handlers::get_cache))
                // SSE events
                .route("/events", get(sse::event_stream)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "jukebox-player",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "state": state.orchestrator.playback_state(),
    }))
}
