use std::sync::Arc;

use video_shorts::config::AppConfig;
use video_shorts::jobs::http::HttpJobService;
use video_shorts::jobs::poller::JobPoller;
use video_shorts::jobs::JobService;
use video_shorts::runner::PipelineRunner;
use video_shorts::store::{MemoryStore, SharedStore};
use video_shorts::tracking::{EventHub, FanoutPublisher, StageTracker, WebhookPublisher};
use video_shorts::workers::{HighlightsWorker, HttpWorker, WorkerRegistry};
use video_shorts::workflow::{ExecutionEngine, PipelineSet};
use video_shorts::{db, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env()?;

    let (store, store_kind): (SharedStore, &'static str) = match &config.database_url {
        Some(url) => (Arc::new(db::create_store(url).await?) as SharedStore, "postgres"),
        None => {
            tracing::warn!("DATABASE_URL not set, run records are kept in memory only");
            (Arc::new(MemoryStore::new()) as SharedStore, "memory")
        }
    };

    // Stage notifications go to live subscribers and, when configured, a webhook
    let events = Arc::new(EventHub::new());
    let mut publisher = FanoutPublisher::new().with(events.clone());
    if let Some(url) = &config.event_webhook_url {
        tracing::info!("Stage notifications will also be POSTed to {}", url);
        publisher = publisher.with(Arc::new(WebhookPublisher::new(url)));
    }
    let tracker = Arc::new(StageTracker::new(store.clone(), Arc::new(publisher)));

    let workers = WorkerRegistry::new()
        .register(HighlightsWorker::NAME, Arc::new(HighlightsWorker::new(store.clone())))
        .with_fallback(Arc::new(HttpWorker::new(&config.worker_base_url)));

    let jobs: Arc<dyn JobService> = Arc::new(HttpJobService::new(&config.job_service_url));
    let poller = JobPoller::new()
        .with_service(&config.pipeline.transcription_service, jobs.clone())
        .with_service(&config.pipeline.render_service, jobs.clone())
        .with_service(&config.pipeline.shot_detection_service, jobs);

    let engine = ExecutionEngine::new(Arc::new(workers), Arc::new(poller)).with_tracker(tracker);
    let pipelines = PipelineSet::build(&config.pipeline, config.upload_pipeline)?;
    tracing::info!(
        "✅ Pipelines ready, uploads start '{}'",
        pipelines.for_upload().name()
    );

    let state = Arc::new(AppState {
        store: store.clone(),
        runner: PipelineRunner::new(engine, pipelines, store),
        events,
        bucket_name: config.pipeline.bucket_name.clone(),
        store_kind,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, video_shorts::app(state)).await?;
    Ok(())
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "info,video_shorts=debug,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,video_shorts=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for log aggregation
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;

    tracing::info!("🎬 Video shorts orchestrator starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);
    tracing::info!(
        "Configuration - Database: {}, Event webhook: {}",
        if std::env::var("DATABASE_URL").is_ok() { "✅" } else { "❌" },
        if std::env::var("EVENT_WEBHOOK_URL").is_ok() { "✅" } else { "❌" }
    );
    Ok(())
}
