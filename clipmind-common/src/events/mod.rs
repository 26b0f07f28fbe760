//! Pipeline event schema
//!
//! Every event is a JSON object that flattens the shared [`EventEnvelope`]
//! (`event_id`, `event_type`, `timestamp`, `video_id`, `external_id`) next to its
//! stage-specific fields. Stage request topics end in `.requested`; outcome topics
//! end in `.completed` / `.failed`, so each worker subscribes to exactly one stage.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod topics {
    pub const VIDEO_CREATED: &str = "video.created";
    pub const TRANSCRIPT_REQUESTED: &str = "video.transcript.requested";
    pub const EMBEDDING_REQUESTED: &str = "video.embedding.requested";
    pub const SIMILARITY_REQUESTED: &str = "video.similarity.requested";
    pub const ANALYSIS_COMPLETED: &str = "video.analysis.completed";
    pub const ANALYSIS_FAILED: &str = "video.analysis.failed";

    pub const ALL: [&str; 6] = [
        VIDEO_CREATED,
        TRANSCRIPT_REQUESTED,
        EMBEDDING_REQUESTED,
        SIMILARITY_REQUESTED,
        ANALYSIS_COMPLETED,
        ANALYSIS_FAILED,
    ];

    /// Default partition count per topic
    pub fn partitions(topic: &str) -> u32 {
        match topic {
            VIDEO_CREATED => 3,
            TRANSCRIPT_REQUESTED => 5,
            EMBEDDING_REQUESTED => 3,
            SIMILARITY_REQUESTED => 2,
            ANALYSIS_COMPLETED => 2,
            ANALYSIS_FAILED => 1,
            _ => 1,
        }
    }
}

/// Header carrying the event type
pub const HEADER_EVENT_TYPE: &str = "event-type";
/// Header carrying the payload media type
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Discriminator stored in every envelope; doubles as the topic name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "video.created")]
    VideoCreated,
    #[serde(rename = "video.transcript.requested")]
    TranscriptRequested,
    #[serde(rename = "video.embedding.requested")]
    EmbeddingRequested,
    #[serde(rename = "video.similarity.requested")]
    SimilarityRequested,
    #[serde(rename = "video.analysis.completed")]
    AnalysisCompleted,
    #[serde(rename = "video.analysis.failed")]
    AnalysisFailed,
}

impl EventType {
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::VideoCreated => topics::VIDEO_CREATED,
            EventType::TranscriptRequested => topics::TRANSCRIPT_REQUESTED,
            EventType::EmbeddingRequested => topics::EMBEDDING_REQUESTED,
            EventType::SimilarityRequested => topics::SIMILARITY_REQUESTED,
            EventType::AnalysisCompleted => topics::ANALYSIS_COMPLETED,
            EventType::AnalysisFailed => topics::ANALYSIS_FAILED,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Pipeline stage that a worker consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcript,
    Embedding,
    Similarity,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Transcript, Stage::Embedding, Stage::Similarity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcript => "transcript",
            Stage::Embedding => "embedding",
            Stage::Similarity => "similarity",
        }
    }

    /// Topic carrying this stage's requests
    pub fn request_topic(&self) -> &'static str {
        match self {
            Stage::Transcript => topics::TRANSCRIPT_REQUESTED,
            Stage::Embedding => topics::EMBEDDING_REQUESTED,
            Stage::Similarity => topics::SIMILARITY_REQUESTED,
        }
    }

    /// Consumer group name: `<prefix>-<stage>`
    pub fn consumer_group(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub video_id: Uuid,
    pub external_id: String,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, video_id: Uuid, external_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            video_id,
            external_id: external_id.into(),
        }
    }
}

/// Common access to the envelope of any typed event
pub trait PipelineEvent: Serialize + DeserializeOwned + Send + Sync {
    const EVENT_TYPE: EventType;

    fn envelope(&self) -> &EventEnvelope;

    fn topic(&self) -> &'static str {
        Self::EVENT_TYPE.topic()
    }

    /// Partition key; events for one video stay ordered
    fn key(&self) -> String {
        self.envelope().video_id.to_string()
    }
}

macro_rules! pipeline_event {
    ($ty:ident, $event_type:expr) => {
        impl PipelineEvent for $ty {
            const EVENT_TYPE: EventType = $event_type;

            fn envelope(&self) -> &EventEnvelope {
                &self.envelope
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCreated {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub title: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRequested {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequested {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Transcript text carried inline so the embedding stage skips a re-fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRequested {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// None means "compare against the whole corpus"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_video_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCompleted {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub has_transcript: bool,
    pub has_summary: bool,
    pub has_embedding: bool,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFailed {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub stage: Stage,
    pub error: String,
    pub retryable: bool,
}

pipeline_event!(VideoCreated, EventType::VideoCreated);
pipeline_event!(TranscriptRequested, EventType::TranscriptRequested);
pipeline_event!(EmbeddingRequested, EventType::EmbeddingRequested);
pipeline_event!(SimilarityRequested, EventType::SimilarityRequested);
pipeline_event!(AnalysisCompleted, EventType::AnalysisCompleted);
pipeline_event!(AnalysisFailed, EventType::AnalysisFailed);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fields_are_flattened() {
        let video_id = Uuid::new_v4();
        let event = TranscriptRequested {
            envelope: EventEnvelope::new(EventType::TranscriptRequested, video_id, "abc123"),
            priority: 1,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "video.transcript.requested");
        assert_eq!(json["video_id"], video_id.to_string());
        assert_eq!(json["external_id"], "abc123");
        assert_eq!(json["priority"], 1);
        assert!(json.get("envelope").is_none());
    }

    #[test]
    fn test_missing_target_means_whole_corpus() {
        let json = serde_json::json!({
            "event_id": Uuid::new_v4(),
            "event_type": "video.similarity.requested",
            "timestamp": Utc::now(),
            "video_id": Uuid::new_v4(),
            "external_id": "x",
        });
        let event: SimilarityRequested = serde_json::from_value(json).unwrap();
        assert!(event.target_video_id.is_none());
    }

    #[test]
    fn test_topic_partition_defaults() {
        assert_eq!(topics::partitions(topics::TRANSCRIPT_REQUESTED), 5);
        assert_eq!(topics::partitions(topics::ANALYSIS_FAILED), 1);
        assert_eq!(Stage::Embedding.consumer_group("clipmind"), "clipmind-embedding");
        assert_eq!(Stage::Similarity.request_topic(), EventType::SimilarityRequested.topic());
    }
}
