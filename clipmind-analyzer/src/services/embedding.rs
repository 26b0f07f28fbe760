//! Embedding construction
//!
//! One comparable vector per video: title and description are embedded whole,
//! the transcript is chunked by word count and mean-pooled, and the three are
//! combined with fixed weights renormalized over whichever fields are present.

use clipmind_common::db::{EmbeddingType, StoredEmbedding, Video};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cost::{operations, CostRecorder};
use super::provider_cache::{Operation, ProviderCache};
use crate::db::{embeddings, transcripts};
use crate::error::{PipelineError, PipelineResult};
use crate::providers::{LlmProvider, ProviderError};

pub const CHUNK_WORDS: usize = 512;
pub const CHUNK_OVERLAP_WORDS: usize = 50;

pub const TITLE_WEIGHT: f32 = 0.15;
pub const DESCRIPTION_WEIGHT: f32 = 0.20;
pub const TRANSCRIPT_WEIGHT: f32 = 0.65;

/// Named vectors for one video
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSet {
    pub video_id: Uuid,
    pub title: Option<Vec<f32>>,
    pub description: Option<Vec<f32>>,
    pub transcript: Option<Vec<f32>>,
    pub combined: Vec<f32>,
    /// Model that produced the vectors
    pub model: String,
}

impl EmbeddingSet {
    /// Rows to persist: every present vector plus the combined one
    pub fn to_stored(&self) -> Vec<StoredEmbedding> {
        [
            (EmbeddingType::Title, self.title.as_ref()),
            (EmbeddingType::Description, self.description.as_ref()),
            (EmbeddingType::Transcript, self.transcript.as_ref()),
            (EmbeddingType::Combined, Some(&self.combined)),
        ]
        .into_iter()
        .filter_map(|(kind, vector)| {
            vector.map(|v| StoredEmbedding {
                video_id: self.video_id,
                embedding_type: kind,
                vector: v.clone(),
                model: self.model.clone(),
            })
        })
        .collect()
    }
}

/// Split on whitespace into chunks of `chunk_size` words
///
/// Whenever a chunk fills up, its last `overlap` words start the next one.
/// Whatever is left at the end is emitted too, so text that ends exactly on
/// a boundary still yields a final chunk of the carried-over words.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::with_capacity(chunk_size);

    for word in text.split_whitespace() {
        current.push(word);
        if current.len() >= chunk_size {
            chunks.push(current.join(" "));
            if overlap > 0 && current.len() > overlap {
                current.drain(..current.len() - overlap);
            } else {
                current.clear();
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Element-wise mean; `None` for no vectors or mismatched dimensions
pub fn mean_pool(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut sum = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
    }
    let count = vectors.len() as f32;
    Some(sum.into_iter().map(|v| v / count).collect())
}

/// Weighted average of the present vectors, weights renormalized to sum to 1
///
/// `None` if nothing is present or dimensions disagree.
pub fn combine_embeddings(
    title: Option<&[f32]>,
    description: Option<&[f32]>,
    transcript: Option<&[f32]>,
) -> Option<Vec<f32>> {
    let present: Vec<(&[f32], f32)> = [
        (title, TITLE_WEIGHT),
        (description, DESCRIPTION_WEIGHT),
        (transcript, TRANSCRIPT_WEIGHT),
    ]
    .into_iter()
    .filter_map(|(vector, weight)| vector.filter(|v| !v.is_empty()).map(|v| (v, weight)))
    .collect();

    let dim = present.first()?.0.len();
    if present.iter().any(|(v, _)| v.len() != dim) {
        return None;
    }

    let total_weight: f32 = present.iter().map(|(_, w)| w).sum();
    let mut combined = vec![0.0f32; dim];
    for (vector, weight) in &present {
        for (acc, value) in combined.iter_mut().zip(vector.iter()) {
            *acc += value * weight / total_weight;
        }
    }
    Some(combined)
}

pub struct EmbeddingEngine {
    db: SqlitePool,
    providers: Arc<ProviderCache>,
    costs: CostRecorder,
}

impl EmbeddingEngine {
    pub fn new(db: SqlitePool, providers: Arc<ProviderCache>, costs: CostRecorder) -> Self {
        Self {
            db,
            providers,
            costs,
        }
    }

    /// Build, persist and account for the embedding set of `video`
    ///
    /// `transcript_text` is used if given, else the stored transcript (if any).
    /// Any provider failure aborts before anything is written. The stored set
    /// is replaced whole: vectors for fields that are now empty are removed.
    pub async fn embed(
        &self,
        video: &Video,
        transcript_text: Option<String>,
    ) -> PipelineResult<EmbeddingSet> {
        let provider = self.providers.llm(Operation::Embedding).await?;

        let transcript_text = match transcript_text.filter(|t| !t.trim().is_empty()) {
            Some(text) => Some(text),
            None => self.stored_transcript(video.id).await,
        };

        let set = build_embedding_set(provider.as_ref(), video, transcript_text.as_deref()).await?;

        embeddings::replace_embeddings(&self.db, video.id, &set.to_stored()).await?;

        let model = provider.model_info();
        let characters = video.title.chars().count()
            + video.description.chars().count()
            + transcript_text.as_deref().map_or(0, |t| t.chars().count());
        self.costs
            .record(
                Some(video.id),
                operations::EMBEDDING,
                &model.provider,
                &model.name,
                (characters / 4) as i64,
                0,
            )
            .await?;

        info!(
            video_id = %video.id,
            dimensions = set.combined.len(),
            has_transcript = set.transcript.is_some(),
            "Stored embeddings"
        );
        Ok(set)
    }

    async fn stored_transcript(&self, video_id: Uuid) -> Option<String> {
        match transcripts::get_transcript(&self.db, video_id).await {
            Ok(Some(transcript)) => {
                debug!(video_id = %video_id, "Using stored transcript for embeddings");
                Some(transcript.content)
            }
            Ok(None) => {
                warn!(video_id = %video_id, "No transcript, embedding without it");
                None
            }
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Transcript lookup failed, embedding without it");
                None
            }
        }
    }
}

/// Provider calls and vector arithmetic, no persistence
pub async fn build_embedding_set(
    provider: &dyn LlmProvider,
    video: &Video,
    transcript_text: Option<&str>,
) -> PipelineResult<EmbeddingSet> {
    let title = embed_field(provider, &video.title).await?;
    let description = embed_field(provider, &video.description).await?;

    let chunks = transcript_text
        .map(|t| chunk_text(t, CHUNK_WORDS, CHUNK_OVERLAP_WORDS))
        .unwrap_or_default();

    let transcript = if chunks.is_empty() {
        None
    } else {
        let vectors = provider.embed_batch(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} chunk embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }
        let pooled = mean_pool(&vectors).ok_or_else(|| {
            ProviderError::InvalidResponse("chunk embeddings differ in dimension".to_string())
        })?;
        Some(pooled)
    };

    if title.is_none() && description.is_none() && transcript.is_none() {
        return Err(PipelineError::InvalidInput(format!(
            "video {} has no text to embed",
            video.id
        )));
    }

    let combined = combine_embeddings(title.as_deref(), description.as_deref(), transcript.as_deref())
        .ok_or_else(|| {
            ProviderError::InvalidResponse("field embeddings differ in dimension".to_string())
        })?;

    Ok(EmbeddingSet {
        video_id: video.id,
        title,
        description,
        transcript,
        combined,
        model: provider.model_info().name,
    })
}

async fn embed_field(provider: &dyn LlmProvider, text: &str) -> PipelineResult<Option<Vec<f32>>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let vector = provider.embed(text).await?;
    Ok(Some(vector).filter(|v| !v.is_empty()))
}
