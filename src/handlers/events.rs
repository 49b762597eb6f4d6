// src/handlers/events.rs
//! Live stage feed over a websocket, filtered to one run

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};

use crate::tracking::StageChanged;
use crate::AppState;

pub fn routes() -> Router {
    Router::new().route("/api/runs/:id/events", get(stage_feed))
}

/// GET /api/runs/:id/events
async fn stage_feed(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_stages(socket, state, id))
}

async fn stream_stages(socket: WebSocket, state: Arc<AppState>, video_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.events.subscribe(&video_id).await;
    tracing::info!("🔌 Stage feed opened for run: {}", video_id);

    // Persisted stage first, so a late subscriber can reconcile
    match state.store.get_run(&video_id).await {
        Ok(Some(record)) => {
            let mut current = StageChanged::new(&video_id, record.stage);
            if let (Some(code), Some(cause)) = (&record.failure_code, &record.failure_cause) {
                current = current.with_error(code, cause);
            }
            if send_event(&mut sender, &current).await.is_err() {
                state.events.unsubscribe(&video_id, subscription.id).await;
                return;
            }
        }
        Ok(None) => tracing::debug!("No record yet for run {}, waiting for events", video_id),
        Err(e) => tracing::warn!("⚠️ Could not read stage for run {}: {}", video_id, e),
    }

    loop {
        tokio::select! {
            Some(event) = subscription.receiver.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    tracing::debug!("Stage feed client for run {} went away", video_id);
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("⚠️ Stage feed error for run {}: {}", video_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.events.unsubscribe(&video_id, subscription.id).await;
    tracing::info!("🔌 Stage feed closed for run: {}", video_id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &StageChanged,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        tracing::error!("Failed to encode stage event: {}", e);
    })?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::models::Stage;
    use crate::store::RecordStore;
    use crate::testing::{self, ScriptedJobService, ScriptedWorker};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn next_event(client: &mut Client) -> StageChanged {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&message.into_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_feed_sends_the_persisted_stage_then_live_changes() {
        let (state, store, tracker) =
            testing::app_state(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));
        for run_id in ["r1", "r2"] {
            store.create_run(testing::new_run(run_id).into_record()).await.unwrap();
        }
        store.advance_stage("r1", Stage::Transcribed).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let events = state.events.clone();
        tokio::spawn(async move { axum::serve(listener, crate::app(state)).await });

        let (mut client, _) = connect_async(format!("ws://{}/api/runs/r1/events", addr)).await.unwrap();
        assert_eq!(next_event(&mut client).await, StageChanged::new("r1", 1));
        assert_eq!(events.subscriber_count("r1").await, 1);

        // Other runs are filtered out of this feed
        tracker.advance("r2", Stage::Complete).await.unwrap();
        tracker.advance("r1", Stage::HighlightsExtracted).await.unwrap();
        assert_eq!(next_event(&mut client).await, StageChanged::new("r1", 2));

        tracker.mark_failed("r1", "RenderFailed", "render job FAILED").await.unwrap();
        assert_eq!(
            next_event(&mut client).await,
            StageChanged::new("r1", 2).with_error("RenderFailed", "render job FAILED")
        );

        client.close(None).await.unwrap();
        for _ in 0..50 {
            if events.subscriber_count("r1").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(events.subscriber_count("r1").await, 0);
    }

    #[tokio::test]
    async fn test_feed_reports_a_failed_run_on_connect() {
        let (state, store, _) =
            testing::app_state(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));
        store.create_run(testing::new_run("r1").into_record()).await.unwrap();
        store.mark_failed("r1", "ExtractTopicsFailed", "topics worker returned 500").await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, crate::app(state)).await });

        let (mut client, _) = connect_async(format!("ws://{}/api/runs/r1/events", addr)).await.unwrap();
        assert_eq!(
            next_event(&mut client).await,
            StageChanged::new("r1", 0).with_error("ExtractTopicsFailed", "topics worker returned 500")
        );
    }
}
