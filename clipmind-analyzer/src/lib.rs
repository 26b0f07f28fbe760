//! clipmind-analyzer library interface
//!
//! Exposes the engines, pipeline and router for the binary and for
//! integration tests.

pub mod api;
pub mod channel;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod services;
pub mod transport;

pub use crate::error::{ApiError, ApiResult, PipelineError, PipelineResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::channel::EventPublisher;
use crate::pipeline::{EventStageRunner, PipelineOrchestrator, StageExecutor};
use crate::services::{
    AudioLocator, CaptionSource, CostRecorder, EmbeddingEngine, ProviderBuilder, ProviderCache,
    RelatedVideosSource, SettingsStore, SimilarityEngine, SqliteSettingsStore,
    StaticProviderConfig, SummaryService, TranscriptService,
};
use crate::transport::Transport;

/// External collaborators wired into the engines
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub providers: Arc<dyn ProviderBuilder>,
    /// `None` when no platform API key is configured
    pub captions: Option<Arc<dyn CaptionSource>>,
    pub related: Option<Arc<dyn RelatedVideosSource>>,
    pub audio: Arc<dyn AudioLocator>,
}

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Publish attempts for stage follow-ups (run starts try once)
    pub publish_retries: u32,
    pub publish_backoff: Duration,
    pub stage_deadline: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            publish_retries: 3,
            publish_backoff: channel::publisher::DEFAULT_PUBLISH_BACKOFF,
            stage_deadline: pipeline::executor::DEFAULT_STAGE_DEADLINE,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
    pub transport: Arc<dyn Transport>,
    pub publisher: EventPublisher,
    pub publish_retries: u32,
    pub settings: Arc<dyn SettingsStore>,
    pub providers: Arc<ProviderCache>,
    pub costs: CostRecorder,
    pub transcripts: Arc<TranscriptService>,
    pub summaries: Arc<SummaryService>,
    pub similarity: Arc<SimilarityEngine>,
    pub executor: Arc<StageExecutor>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl AppState {
    /// Wire engines, pipeline and collaborators over one database pool
    pub fn new(
        db: SqlitePool,
        provider_config: StaticProviderConfig,
        collaborators: Collaborators,
        options: PipelineOptions,
    ) -> Self {
        let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::new(db.clone()));
        let providers = Arc::new(ProviderCache::new(
            Arc::clone(&settings),
            provider_config,
            collaborators.providers,
        ));
        let costs = CostRecorder::new(db.clone());

        let transcripts = Arc::new(TranscriptService::new(
            db.clone(),
            Arc::clone(&providers),
            collaborators.captions,
            Arc::clone(&collaborators.audio),
            Arc::clone(&settings),
            costs.clone(),
        ));
        let summaries = Arc::new(SummaryService::new(
            db.clone(),
            Arc::clone(&providers),
            Arc::clone(&transcripts),
            collaborators.audio,
            Arc::clone(&settings),
            costs.clone(),
        ));
        let embeddings = Arc::new(EmbeddingEngine::new(
            db.clone(),
            Arc::clone(&providers),
            costs.clone(),
        ));
        let similarity = Arc::new(SimilarityEngine::new(db.clone(), collaborators.related));

        let executor = Arc::new(
            StageExecutor::new(
                db.clone(),
                Arc::clone(&transcripts),
                embeddings,
                Arc::clone(&similarity),
            )
            .with_deadline(options.stage_deadline),
        );

        let publisher = EventPublisher::new(Arc::clone(&collaborators.transport))
            .with_backoff_step(options.publish_backoff);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            db.clone(),
            publisher.clone(),
            Arc::clone(&executor),
        ));

        Self {
            db,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            transport: collaborators.transport,
            publisher,
            publish_retries: options.publish_retries,
            settings,
            providers,
            costs,
            transcripts,
            summaries,
            similarity,
            executor,
            orchestrator,
        }
    }

    /// Follow-up runner for the stage workers
    pub fn event_runner(&self) -> EventStageRunner {
        EventStageRunner::new(self.publisher.clone(), self.publish_retries)
    }

    /// Remember a failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::video_routes())
        .merge(api::settings_routes())
        .merge(api::cost_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
