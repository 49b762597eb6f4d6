// src/handlers/mod.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;
use thiserror::Error;

use crate::runner::RunnerError;
use crate::store::StoreError;

pub mod events;
pub mod runs;
pub mod trigger;

/// All API routes
pub fn router() -> Router {
    Router::new()
        .merge(runs::routes())
        .merge(trigger::routes())
        .merge(events::routes())
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        } else {
            tracing::debug!("API error ({}): {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(_) | StoreError::HighlightNotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::DuplicateRun(_) => ApiError::Conflict(err.to_string()),
            StoreError::Database(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::InvalidKey(_) => ApiError::BadRequest(err.to_string()),
            RunnerError::RunNotFound(_) => ApiError::NotFound(err.to_string()),
            RunnerError::Store(store) => store.into(),
            RunnerError::Encode(_) => ApiError::Internal(err.to_string()),
        }
    }
}
