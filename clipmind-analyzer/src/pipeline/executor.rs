//! Stage logic shared by the event-driven and direct paths
//!
//! [`StageExecutor::run`] performs one stage for one video, then hands the
//! resulting follow-ups (next request, completion, failure) to a
//! [`StageRunner`]. The runner decides whether a follow-up becomes a published
//! event or a direct call, so the stage logic exists once.

use async_trait::async_trait;
use clipmind_common::db::{EmbeddingType, Video, VideoStatus};
use clipmind_common::events::{
    AnalysisCompleted, AnalysisFailed, EmbeddingRequested, EventEnvelope, EventType,
    SimilarityRequested, Stage, TranscriptRequested,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::AttemptInfo;
use crate::db::{embeddings, summaries, transcripts, videos};
use crate::db::videos::StatusChange;
use crate::error::{PipelineError, PipelineResult};
use crate::providers::ProviderError;
use crate::services::similarity::{DEFAULT_CORPUS_LIMIT, DEFAULT_MIN_SCORE};
use crate::services::{EmbeddingEngine, SimilarityEngine, TranscriptService};

/// Deadline for one stage's work
pub const DEFAULT_STAGE_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// A request for one stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageRequest {
    Transcript(TranscriptRequested),
    Embedding(EmbeddingRequested),
    Similarity(SimilarityRequested),
}

impl StageRequest {
    pub fn stage(&self) -> Stage {
        match self {
            StageRequest::Transcript(_) => Stage::Transcript,
            StageRequest::Embedding(_) => Stage::Embedding,
            StageRequest::Similarity(_) => Stage::Similarity,
        }
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            StageRequest::Transcript(e) => &e.envelope,
            StageRequest::Embedding(e) => &e.envelope,
            StageRequest::Similarity(e) => &e.envelope,
        }
    }

    pub fn transcript(video: &Video, priority: i32) -> Self {
        StageRequest::Transcript(TranscriptRequested {
            envelope: EventEnvelope::new(EventType::TranscriptRequested, video.id, &video.external_id),
            priority,
        })
    }
}

/// What a finished stage asks for next
#[derive(Debug, Clone, PartialEq)]
pub enum Followup {
    Request(StageRequest),
    Completed(AnalysisCompleted),
    Failed(AnalysisFailed),
}

/// Delivers follow-ups: as events, or by running the next stage directly
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn dispatch(&self, followup: Followup) -> PipelineResult<()>;
}

/// Engines behind each stage
pub struct StageExecutor {
    db: SqlitePool,
    transcripts: Arc<TranscriptService>,
    embeddings: Arc<EmbeddingEngine>,
    similarity: Arc<SimilarityEngine>,
    deadline: Duration,
}

impl StageExecutor {
    pub fn new(
        db: SqlitePool,
        transcripts: Arc<TranscriptService>,
        embeddings: Arc<EmbeddingEngine>,
        similarity: Arc<SimilarityEngine>,
    ) -> Self {
        Self {
            db,
            transcripts,
            embeddings,
            similarity,
            deadline: DEFAULT_STAGE_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run one stage and dispatch its follow-ups
    ///
    /// Failure handling depends on `attempt`:
    /// - retryable failure, attempts left: returned as-is so the caller retries
    /// - retryable failure, last attempt: finalized, then returned (not committed)
    /// - non-retryable failure: finalized, then `Ok` (the request is consumed)
    ///
    /// Finalizing a transcript or embedding failure marks the video `error`
    /// and emits `analysis-failed`; a similarity failure still completes the run.
    /// A transcript or embedding request for a `pending` or `error` video first
    /// moves it to `processing`.
    pub async fn run(
        &self,
        request: StageRequest,
        attempt: AttemptInfo,
        runner: &dyn StageRunner,
    ) -> PipelineResult<()> {
        let stage = request.stage();
        let video_id = request.envelope().video_id;
        let external_id = request.envelope().external_id.clone();

        let video = match videos::get_video(&self.db, video_id).await? {
            Some(video) => video,
            None => {
                warn!(video_id = %video_id, stage = %stage, "Video no longer exists, dropping request");
                return Ok(());
            }
        };

        debug!(video_id = %video_id, stage = %stage, attempt = attempt.number, "Running stage");

        // Entry into a run, or a redelivered request resuming a failed one
        if matches!(stage, Stage::Transcript | Stage::Embedding)
            && matches!(video.status, VideoStatus::Pending | VideoStatus::Error)
        {
            self.set_status(video_id, VideoStatus::Processing).await;
        }

        let outcome = match tokio::time::timeout(self.deadline, self.execute(&video, request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::Provider(ProviderError::Unavailable(format!(
                "{} stage exceeded {}s",
                stage,
                self.deadline.as_secs()
            )))),
        };

        let err = match outcome {
            Ok(followups) => {
                for followup in followups {
                    runner.dispatch(followup).await?;
                }
                return Ok(());
            }
            Err(err) => err,
        };

        let retryable = err.retryable();
        if retryable && !attempt.is_last {
            return Err(err);
        }

        error!(
            video_id = %video_id,
            stage = %stage,
            attempt = attempt.number,
            retryable,
            error = %err,
            "Stage failed"
        );

        let finalized = match stage {
            Stage::Transcript | Stage::Embedding => {
                self.set_status(video_id, VideoStatus::Error).await;
                Followup::Failed(AnalysisFailed {
                    envelope: EventEnvelope::new(EventType::AnalysisFailed, video_id, external_id),
                    stage,
                    error: err.to_string(),
                    retryable,
                })
            }
            Stage::Similarity => Followup::Completed(self.completion(&video).await),
        };
        runner.dispatch(finalized).await?;

        if retryable {
            Err(err)
        } else {
            Ok(())
        }
    }

    async fn execute(&self, video: &Video, request: StageRequest) -> PipelineResult<Vec<Followup>> {
        match request {
            StageRequest::Transcript(_) => {
                let transcript = self.transcripts.get_or_create(video).await?;
                Ok(vec![Followup::Request(StageRequest::Embedding(EmbeddingRequested {
                    envelope: EventEnvelope::new(EventType::EmbeddingRequested, video.id, &video.external_id),
                    transcript_content: Some(transcript.content),
                }))])
            }
            StageRequest::Embedding(event) => {
                let set = self.embeddings.embed(video, event.transcript_content).await?;
                self.set_status(video.id, VideoStatus::Completed).await;

                Ok(vec![
                    Followup::Request(StageRequest::Similarity(SimilarityRequested {
                        envelope: EventEnvelope::new(
                            EventType::SimilarityRequested,
                            video.id,
                            &video.external_id,
                        ),
                        target_video_id: None,
                    })),
                    Followup::Completed(AnalysisCompleted {
                        envelope: EventEnvelope::new(EventType::AnalysisCompleted, video.id, &video.external_id),
                        has_transcript: set.transcript.is_some(),
                        has_summary: self.has_summary(video.id).await,
                        has_embedding: true,
                        duration_seconds: video.duration_seconds,
                    }),
                ])
            }
            StageRequest::Similarity(event) => {
                match event.target_video_id {
                    Some(target) => {
                        let outcome = self.similarity.compute(video.id, target).await?;
                        info!(
                            video_id = %video.id,
                            target = %target,
                            score = outcome.edge().combined_score,
                            persisted = outcome.is_persisted(),
                            "Compared videos"
                        );
                    }
                    None => {
                        self.similarity
                            .compare_with_corpus(video.id, DEFAULT_CORPUS_LIMIT, DEFAULT_MIN_SCORE)
                            .await?;
                    }
                }
                Ok(vec![Followup::Completed(self.completion(video).await)])
            }
        }
    }

    async fn has_summary(&self, video_id: Uuid) -> bool {
        summaries::has_summary(&self.db, video_id).await.unwrap_or_else(|e| {
            warn!(video_id = %video_id, error = %e, "Failed to check for a stored summary");
            false
        })
    }

    /// Completion event reflecting what is stored for `video`
    async fn completion(&self, video: &Video) -> AnalysisCompleted {
        let has_transcript = matches!(transcripts::get_transcript(&self.db, video.id).await, Ok(Some(_)));
        let has_embedding = matches!(
            embeddings::get_embedding(&self.db, video.id, EmbeddingType::Combined).await,
            Ok(Some(_))
        );

        AnalysisCompleted {
            envelope: EventEnvelope::new(EventType::AnalysisCompleted, video.id, &video.external_id),
            has_transcript,
            has_summary: self.has_summary(video.id).await,
            has_embedding,
            duration_seconds: video.duration_seconds,
        }
    }

    /// Forward-only status write; rejections and storage errors are logged
    async fn set_status(&self, video_id: Uuid, next: VideoStatus) {
        match videos::update_status(&self.db, video_id, next).await {
            Ok(StatusChange::Applied) => {
                debug!(video_id = %video_id, status = %next, "Status updated");
            }
            Ok(StatusChange::Rejected { current }) => {
                warn!(video_id = %video_id, from = %current, to = %next, "Status change rejected");
            }
            Err(e) => {
                warn!(video_id = %video_id, status = %next, error = %e, "Status update failed");
            }
        }
    }
}
