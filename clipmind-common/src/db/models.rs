//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

// ============================================================================
// Video
// ============================================================================

/// Processing status of a video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Error => "error",
        }
    }

    /// True once a run has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Error)
    }

    /// Forward-only transition rule within a single run
    ///
    /// Writing the current state again is allowed (redelivered events), and a
    /// failed run may resume when one of its stage requests is delivered again.
    /// Leaving `completed` requires an explicit re-analysis.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (VideoStatus::Pending, VideoStatus::Processing)
                | (VideoStatus::Pending, VideoStatus::Error)
                | (VideoStatus::Processing, VideoStatus::Completed)
                | (VideoStatus::Processing, VideoStatus::Error)
                | (VideoStatus::Error, VideoStatus::Processing)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "error" => Ok(VideoStatus::Error),
            other => Err(Error::InvalidInput(format!("Unknown video status: {}", other))),
        }
    }
}

/// A video flowing through the analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    /// Platform identifier (e.g. the YouTube video id), unique
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub duration_seconds: i64,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// New pending video with a fresh id
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            title: title.into(),
            description: String::new(),
            channel_id: None,
            channel_name: None,
            duration_seconds: 0,
            status: VideoStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// Where a transcript came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    /// Platform-native captions
    Youtube,
    /// Speech-to-text
    Whisper,
}

impl TranscriptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptSource::Youtube => "youtube",
            TranscriptSource::Whisper => "whisper",
        }
    }
}

impl FromStr for TranscriptSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(TranscriptSource::Youtube),
            "whisper" => Ok(TranscriptSource::Whisper),
            other => Err(Error::InvalidInput(format!(
                "Unknown transcript source: {}",
                other
            ))),
        }
    }
}

/// Timed transcript fragment (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    pub video_id: Uuid,
    pub language: String,
    pub source: TranscriptSource,
    pub content: String,
    /// Ordered by start time
    pub segments: Vec<TranscriptSegment>,
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new(
        video_id: Uuid,
        language: impl Into<String>,
        source: TranscriptSource,
        content: impl Into<String>,
        mut segments: Vec<TranscriptSegment>,
    ) -> Self {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            id: Uuid::new_v4(),
            video_id,
            language: language.into(),
            source,
            content: content.into(),
            segments,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Shape of a generated summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    /// A few paragraphs
    #[default]
    Short,
    Detailed,
    BulletPoints,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Short => "short",
            SummaryType::Detailed => "detailed",
            SummaryType::BulletPoints => "bullet_points",
        }
    }
}

impl FromStr for SummaryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(SummaryType::Short),
            "detailed" => Ok(SummaryType::Detailed),
            "bullet_points" => Ok(SummaryType::BulletPoints),
            other => Err(Error::InvalidInput(format!("Unknown summary type: {}", other))),
        }
    }
}

/// LLM-written summary of a video's transcript
///
/// A video may accumulate several; the newest one is current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub video_id: Uuid,
    /// `provider/model` that wrote it
    pub model_used: String,
    pub summary_type: SummaryType,
    pub content: String,
    pub key_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(
        video_id: Uuid,
        model_used: impl Into<String>,
        summary_type: SummaryType,
        content: impl Into<String>,
        key_points: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            model_used: model_used.into(),
            summary_type,
            content: content.into(),
            key_points,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Named vector kinds stored per video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingType {
    Title,
    Description,
    Transcript,
    Combined,
}

impl EmbeddingType {
    pub const ALL: [EmbeddingType; 4] = [
        EmbeddingType::Title,
        EmbeddingType::Description,
        EmbeddingType::Transcript,
        EmbeddingType::Combined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingType::Title => "title",
            EmbeddingType::Description => "description",
            EmbeddingType::Transcript => "transcript",
            EmbeddingType::Combined => "combined",
        }
    }
}

impl FromStr for EmbeddingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(EmbeddingType::Title),
            "description" => Ok(EmbeddingType::Description),
            "transcript" => Ok(EmbeddingType::Transcript),
            "combined" => Ok(EmbeddingType::Combined),
            other => Err(Error::InvalidInput(format!("Unknown embedding type: {}", other))),
        }
    }
}

/// One stored vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub video_id: Uuid,
    pub embedding_type: EmbeddingType,
    pub vector: Vec<f32>,
    pub model: String,
}

// ============================================================================
// Similarity
// ============================================================================

/// Order two ids so the lower one comes first
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Unordered pair of videos with per-field cosine scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    /// Lower id of the pair
    pub video_a: Uuid,
    /// Higher id of the pair
    pub video_b: Uuid,
    pub title_score: f64,
    pub description_score: f64,
    pub transcript_score: f64,
    pub combined_score: f64,
}

impl SimilarityEdge {
    /// The id on the other side of the edge from `video_id`
    pub fn other(&self, video_id: Uuid) -> Uuid {
        if self.video_a == video_id {
            self.video_b
        } else {
            self.video_a
        }
    }
}

// ============================================================================
// Usage
// ============================================================================

/// Append-only model usage ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub video_id: Option<Uuid>,
    pub operation: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}
