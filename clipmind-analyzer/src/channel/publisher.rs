//! Typed event publishing

use clipmind_common::events::{
    PipelineEvent, CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE, HEADER_EVENT_TYPE,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::transport::{Delivery, OutboundRecord, Transport, TransportError};

/// Default linear backoff step between publish attempts
pub const DEFAULT_PUBLISH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    backoff_step: Duration,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            backoff_step: DEFAULT_PUBLISH_BACKOFF,
        }
    }

    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Serialize and append one event; returns once the log acknowledges it
    pub async fn publish<E: PipelineEvent>(&self, event: &E) -> Result<(), TransportError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| TransportError::Serialization(e.to_string()))?;

        let record = OutboundRecord {
            topic: event.topic().to_string(),
            key: event.key(),
            payload,
            headers: vec![
                (HEADER_EVENT_TYPE.to_string(), E::EVENT_TYPE.to_string()),
                (HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string()),
            ],
        };

        self.transport.publish(record).await?;

        debug!(
            topic = event.topic(),
            video_id = %event.envelope().video_id,
            event_id = %event.envelope().event_id,
            "Published event"
        );
        Ok(())
    }

    /// [`publish`](Self::publish) with up to `attempts` tries and linear backoff
    ///
    /// Serialization failures are returned immediately.
    pub async fn publish_with_retry<E: PipelineEvent>(
        &self,
        event: &E,
        attempts: u32,
    ) -> Result<(), TransportError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.publish(event).await {
                Ok(()) => return Ok(()),
                Err(e @ TransportError::Serialization(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        topic = event.topic(),
                        attempt,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(self.backoff_step * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Decode a delivery into a typed event
pub fn decode<E: PipelineEvent>(delivery: &Delivery) -> Result<E, serde_json::Error> {
    serde_json::from_slice(&delivery.payload)
}
