//! Follow-up delivery strategies

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::executor::{Followup, StageExecutor, StageRequest, StageRunner};
use crate::channel::{AttemptInfo, EventPublisher};
use crate::error::PipelineResult;

/// Publishes every follow-up as an event, retrying transport failures
#[derive(Clone)]
pub struct EventStageRunner {
    publisher: EventPublisher,
    attempts: u32,
}

impl EventStageRunner {
    /// `attempts` publish tries per follow-up, with the publisher's backoff
    pub fn new(publisher: EventPublisher, attempts: u32) -> Self {
        Self { publisher, attempts }
    }
}

#[async_trait]
impl StageRunner for EventStageRunner {
    async fn dispatch(&self, followup: Followup) -> PipelineResult<()> {
        let publisher = &self.publisher;
        let attempts = self.attempts;
        match followup {
            Followup::Request(StageRequest::Transcript(event)) => {
                publisher.publish_with_retry(&event, attempts).await?
            }
            Followup::Request(StageRequest::Embedding(event)) => {
                publisher.publish_with_retry(&event, attempts).await?
            }
            Followup::Request(StageRequest::Similarity(event)) => {
                publisher.publish_with_retry(&event, attempts).await?
            }
            Followup::Completed(event) => publisher.publish_with_retry(&event, attempts).await?,
            Followup::Failed(event) => publisher.publish_with_retry(&event, attempts).await?,
        }
        Ok(())
    }
}

/// Runs requested stages in-process, one after another
///
/// Used when the log is unreachable. Completion and failure are logged
/// instead of published.
pub struct DirectStageRunner {
    executor: Arc<StageExecutor>,
}

impl DirectStageRunner {
    pub fn new(executor: Arc<StageExecutor>) -> Self {
        Self { executor }
    }

    /// Run `request` and every stage it leads to
    pub async fn run(&self, request: StageRequest) -> PipelineResult<()> {
        self.executor.run(request, AttemptInfo::only(), self).await
    }
}

#[async_trait]
impl StageRunner for DirectStageRunner {
    async fn dispatch(&self, followup: Followup) -> PipelineResult<()> {
        match followup {
            Followup::Request(request) => self.run(request).await,
            Followup::Completed(event) => {
                info!(
                    video_id = %event.envelope.video_id,
                    has_transcript = event.has_transcript,
                    has_embedding = event.has_embedding,
                    "Analysis completed (direct)"
                );
                Ok(())
            }
            Followup::Failed(event) => {
                warn!(
                    video_id = %event.envelope.video_id,
                    stage = %event.stage,
                    retryable = event.retryable,
                    error = %event.error,
                    "Analysis failed (direct)"
                );
                Ok(())
            }
        }
    }
}
