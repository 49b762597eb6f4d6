// src/handlers/trigger.rs
//! Pipeline triggers: upload completion and short generation

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};

use super::ApiError;
use crate::models::{EnvelopeResponse, RunStarted, ShortRequest, UploadEvent};
use crate::AppState;

pub fn routes() -> Router {
    Router::new()
        .route("/api/events/upload", post(upload_completed))
        .route("/api/shorts", post(generate_short))
}

/// POST /api/events/upload - Start the upload pipeline for `<runId>/RAW.<ext>`
async fn upload_completed(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<UploadEvent>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let handle = state.runner.on_upload(event).await?;
    tracing::info!(run_id = %handle.started.run_id, "📥 Upload completed, pipeline started");
    Ok((StatusCode::ACCEPTED, Json(handle.started)))
}

/// POST /api/shorts - Start the short generation pipeline
async fn generate_short(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ShortRequest>,
) -> Result<Json<EnvelopeResponse>, ApiError> {
    let handle = state.runner.generate_short(request)?;
    tracing::info!(run_id = %handle.started.run_id, "🎞️ Short generation started");
    Ok(Json(EnvelopeResponse::success()))
}
