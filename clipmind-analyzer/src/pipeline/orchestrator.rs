//! Run start-up: event-driven when the log accepts the first event, direct otherwise

use clipmind_common::db::{Video, VideoStatus};
use clipmind_common::events::{EventEnvelope, EventType, TranscriptRequested, VideoCreated};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::{StageExecutor, StageRequest};
use super::runner::DirectStageRunner;
use crate::channel::EventPublisher;
use crate::db::videos::{self, StatusChange};
use crate::error::PipelineResult;

/// Priority carried by the first transcript request of a run
pub const INITIAL_PRIORITY: i32 = 1;

/// How a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Stages run in the workers, driven by events
    Event,
    /// Stages run in a detached in-process task
    Fallback,
}

/// A started run
#[derive(Debug)]
pub struct RunHandle {
    pub mode: StartMode,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for a fallback run to finish; returns at once for event runs
    pub async fn wait(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                error!(error = %e, "Fallback run panicked");
            }
        }
    }
}

/// Starts runs from request handlers
///
/// The events that start a run get one publish attempt; if it fails the run
/// continues in-process.
pub struct PipelineOrchestrator {
    db: SqlitePool,
    publisher: EventPublisher,
    executor: Arc<StageExecutor>,
}

impl PipelineOrchestrator {
    /// # Arguments
    /// * `publisher` - Event publisher over the durable log
    /// * `executor` - Stage logic, shared with the workers
    pub fn new(db: SqlitePool, publisher: EventPublisher, executor: Arc<StageExecutor>) -> Self {
        Self {
            db,
            publisher,
            executor,
        }
    }

    /// Start the first run of a newly stored video
    ///
    /// Marks it processing, publishes `video.created` and the first transcript
    /// request. If either publish fails the run continues in-process.
    pub async fn start(&self, video: &Video) -> PipelineResult<RunHandle> {
        self.mark_processing(video.id).await?;

        let created = VideoCreated {
            envelope: EventEnvelope::new(EventType::VideoCreated, video.id, &video.external_id),
            title: video.title.clone(),
            duration_seconds: video.duration_seconds,
        };

        if let Err(e) = self.publisher.publish(&created).await {
            warn!(video_id = %video.id, error = %e, "Event log unavailable, running pipeline directly");
            return Ok(self.spawn_direct(video));
        }

        self.request_transcript(video).await
    }

    /// Start a new run for a video in any state
    ///
    /// Same publish-or-fallback start as [`start`](Self::start), without
    /// announcing the video again.
    pub async fn reanalyze(&self, video_id: Uuid) -> PipelineResult<(Video, RunHandle)> {
        videos::restart_run(&self.db, video_id).await?;
        let video = videos::require_video(&self.db, video_id).await?;

        info!(video_id = %video.id, "Re-analysis requested");
        let handle = self.request_transcript(&video).await?;
        Ok((video, handle))
    }

    /// Run every stage for `video` in the current task
    ///
    /// Status moves through processing exactly as in an event-driven run.
    pub async fn run_direct(&self, video: &Video) -> PipelineResult<()> {
        self.mark_processing(video.id).await?;
        DirectStageRunner::new(Arc::clone(&self.executor))
            .run(StageRequest::transcript(video, INITIAL_PRIORITY))
            .await
    }

    async fn request_transcript(&self, video: &Video) -> PipelineResult<RunHandle> {
        let request = TranscriptRequested {
            envelope: EventEnvelope::new(EventType::TranscriptRequested, video.id, &video.external_id),
            priority: INITIAL_PRIORITY,
        };

        match self.publisher.publish(&request).await {
            Ok(()) => {
                info!(video_id = %video.id, "Pipeline started");
                Ok(RunHandle {
                    mode: StartMode::Event,
                    task: None,
                })
            }
            Err(e) => {
                warn!(video_id = %video.id, error = %e, "Event log unavailable, running pipeline directly");
                Ok(self.spawn_direct(video))
            }
        }
    }

    fn spawn_direct(&self, video: &Video) -> RunHandle {
        let runner = DirectStageRunner::new(Arc::clone(&self.executor));
        let request = StageRequest::transcript(video, INITIAL_PRIORITY);
        let video_id = video.id;

        let task = tokio::spawn(async move {
            match runner.run(request).await {
                Ok(()) => info!(video_id = %video_id, "Direct pipeline finished"),
                Err(e) => error!(video_id = %video_id, error = %e, "Direct pipeline failed"),
            }
        });

        RunHandle {
            mode: StartMode::Fallback,
            task: Some(task),
        }
    }

    async fn mark_processing(&self, video_id: Uuid) -> PipelineResult<()> {
        if let StatusChange::Rejected { current } =
            videos::update_status(&self.db, video_id, VideoStatus::Processing).await?
        {
            warn!(video_id = %video_id, status = %current, "Video already past processing");
        }
        Ok(())
    }
}
