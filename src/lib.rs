// lib.rs - Video highlight pipeline orchestration
pub mod config;
pub mod db;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod runner;
pub mod store;
pub mod tracking;
pub mod workers;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::runner::PipelineRunner;
use crate::store::SharedStore;
use crate::tracking::EventHub;

// AppState holds the record store, the pipeline runner and the live stage channel
pub struct AppState {
    pub store: SharedStore,
    pub runner: PipelineRunner,
    pub events: Arc<EventHub>,
    pub bucket_name: String,
    /// "postgres" or "memory"
    pub store_kind: &'static str,
}

/// Full HTTP application with shared state attached
pub fn app(state: Arc<AppState>) -> Router {
    handlers::router()
        .route("/api/status", get(api_status))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

async fn api_status(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store_kind,
    }))
}
