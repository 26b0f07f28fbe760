//! One consume loop per stage topic

use async_trait::async_trait;
use clipmind_common::events::Stage;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::executor::{StageExecutor, StageRequest};
use super::runner::EventStageRunner;
use crate::channel::{decode, AttemptInfo, ConsumerLoop, ConsumerStats, MessageHandler, RetryPolicy};
use crate::error::PipelineResult;
use crate::transport::{Delivery, Transport};

/// Decodes a stage request and runs it through the executor
pub struct StageHandler {
    stage: Stage,
    executor: Arc<StageExecutor>,
    runner: EventStageRunner,
}

impl StageHandler {
    pub fn new(stage: Stage, executor: Arc<StageExecutor>, runner: EventStageRunner) -> Self {
        Self {
            stage,
            executor,
            runner,
        }
    }

    fn decode(&self, delivery: &Delivery) -> Result<StageRequest, serde_json::Error> {
        Ok(match self.stage {
            Stage::Transcript => StageRequest::Transcript(decode(delivery)?),
            Stage::Embedding => StageRequest::Embedding(decode(delivery)?),
            Stage::Similarity => StageRequest::Similarity(decode(delivery)?),
        })
    }
}

#[async_trait]
impl MessageHandler for StageHandler {
    async fn handle(&self, delivery: &Delivery, attempt: AttemptInfo) -> PipelineResult<()> {
        let request = match self.decode(delivery) {
            Ok(request) => request,
            Err(e) => {
                // Undecodable records never succeed; consume them
                error!(
                    stage = %self.stage,
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    error = %e,
                    "Dropping malformed event"
                );
                return Ok(());
            }
        };

        self.executor.run(request, attempt, &self.runner).await
    }
}

/// Running stage consumers
pub struct Workers {
    handles: Vec<(Stage, JoinHandle<ConsumerStats>)>,
}

impl Workers {
    /// Subscribe `<group_prefix>-<stage>` to each stage topic and start its loop
    pub async fn spawn(
        transport: Arc<dyn Transport>,
        executor: Arc<StageExecutor>,
        runner: EventStageRunner,
        group_prefix: &str,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> PipelineResult<Self> {
        let mut handles = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let group = stage.consumer_group(group_prefix);
            let subscription = transport.subscribe(stage.request_topic(), &group).await?;
            let consumer = ConsumerLoop::new(group.clone(), subscription, policy, cancel.clone());
            let handler = StageHandler::new(stage, Arc::clone(&executor), runner.clone());

            info!(stage = %stage, group = %group, topic = stage.request_topic(), "Starting worker");
            handles.push((stage, tokio::spawn(async move { consumer.run(&handler).await })));
        }

        Ok(Self { handles })
    }

    /// Wait for every loop to stop (after the cancellation token fires)
    pub async fn join(self) -> Vec<(Stage, ConsumerStats)> {
        let (stages, tasks): (Vec<Stage>, Vec<_>) = self.handles.into_iter().unzip();

        stages
            .into_iter()
            .zip(join_all(tasks).await)
            .map(|(stage, joined)| {
                let stats = joined.unwrap_or_else(|e| {
                    error!(stage = %stage, error = %e, "Worker task panicked");
                    ConsumerStats::default()
                });
                (stage, stats)
            })
            .collect()
    }
}
