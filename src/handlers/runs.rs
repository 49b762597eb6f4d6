// src/handlers/runs.rs
//! Run records and the highlight editing surface

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};

use super::ApiError;
use crate::models::{ExecutionRecord, HighlightRecord, HighlightUpdate, NewExecution, RunStarted};
use crate::AppState;

pub fn routes() -> Router {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/:id", get(get_run).delete(delete_run))
        .route("/api/runs/:id/start", post(start_run))
        .route("/api/runs/:id/highlights", get(list_highlights))
        .route("/api/runs/:id/highlights/:index", put(update_highlight))
}

/// POST /api/runs - Create a run at stage 0
async fn create_run(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<NewExecution>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.store.create_run(request.into_record()).await?;
    tracing::info!(run_id = %record.id, "📝 Created run for {}", record.video_name);
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/runs/:id
async fn get_run(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    state
        .store
        .get_run(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run '{}' not found", id)))
}

/// DELETE /api/runs/:id - Remove a run and its highlights
async fn delete_run(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_run(&id).await? {
        tracing::info!(run_id = %id, "🗑️ Deleted run");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("run '{}' not found", id)))
    }
}

/// POST /api/runs/:id/start - Start the unified pipeline for an existing run
async fn start_run(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let handle = state.runner.start_run(&id, &state.bucket_name).await?;
    Ok((StatusCode::ACCEPTED, Json(handle.started)))
}

/// GET /api/runs/:id/highlights
async fn list_highlights(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<HighlightRecord>>, ApiError> {
    Ok(Json(state.store.list_highlights(&id).await?))
}

/// PUT /api/runs/:id/highlights/:index - Edit a highlight's timeframe or text
async fn update_highlight(
    Path((id, index)): Path<(String, i32)>,
    Extension(state): Extension<Arc<AppState>>,
    Json(update): Json<HighlightUpdate>,
) -> Result<Json<HighlightRecord>, ApiError> {
    if let (Some(start), Some(end)) = (update.start_time, update.end_time) {
        if end < start {
            return Err(ApiError::BadRequest("end_time is before start_time".to_string()));
        }
    }
    let highlight = state.store.update_highlight(&id, index, update).await?;
    tracing::info!(run_id = %id, index, "✏️ Updated highlight");
    Ok(Json(highlight))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};

    use crate::models::HighlightRecord;
    use crate::store::RecordStore;
    use crate::testing::{self, ScriptedJobService, ScriptedWorker};

    fn app() -> (axum::Router, Arc<crate::store::MemoryStore>) {
        let (state, store, _) = testing::app_state(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));
        (crate::app(state), store)
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (app, _) = app();
        let request = json!({"id": "r1", "video_name": "talk.mp4", "model_id": "m1"});

        let (status, created) = testing::call(&app, Method::POST, "/api/runs", Some(request.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["stage"], 0);
        assert_eq!(created["number_of_videos"], 3);

        let (status, _) = testing::call(&app, Method::POST, "/api/runs", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, fetched) = testing::call(&app, Method::GET, "/api/runs/r1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, body) = testing::call(&app, Method::DELETE, "/api/runs/r1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = testing::call(&app, Method::GET, "/api/runs/r1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = testing::call(&app, Method::DELETE, "/api/runs/r1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_requires_an_existing_run() {
        let (app, store) = app();

        let (status, body) = testing::call(&app, Method::POST, "/api/runs/ghost/start", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("ghost"));

        store.create_run(testing::new_run("r1").into_record()).await.unwrap();
        let (status, body) = testing::call(&app, Method::POST, "/api/runs/r1/start", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"runId": "r1", "pipeline": "unified-reasoning"}));
    }

    #[tokio::test]
    async fn test_highlight_edits() {
        let (app, store) = app();
        store.create_run(testing::new_run("r1").into_record()).await.unwrap();
        store.upsert_highlight(HighlightRecord::new("r1", 0)).await.unwrap();

        let (status, _) = testing::call(
            &app,
            Method::PUT,
            "/api/runs/r1/highlights/0",
            Some(json!({"start_time": 30.0, "end_time": 12.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, edited) = testing::call(
            &app,
            Method::PUT,
            "/api/runs/r1/highlights/0",
            Some(json!({"start_time": 12.0, "end_time": 30.0, "text": "ownership"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["duration"], 18);
        assert_eq!(edited["text"], "ownership");

        let (status, _) = testing::call(&app, Method::PUT, "/api/runs/r1/highlights/7", Some(json!({"text": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, listed) = testing::call(&app, Method::GET, "/api/runs/r1/highlights", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["text"], "ownership");
    }
}
