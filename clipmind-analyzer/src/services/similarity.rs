//! Vector similarity between videos
//!
//! Two entry points with different sources of truth:
//! - [`SimilarityEngine::compute`] scores a pair from stored vectors and
//!   persists the edge canonically (best effort)
//! - [`SimilarityEngine::find_similar`] asks the platform for related videos
//!   and merges them with locally known ones

use clipmind_common::db::{EmbeddingType, SimilarityEdge, Video};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::youtube::RelatedVideosSource;
use crate::db::{embeddings, similarities, videos};
use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CORPUS_LIMIT: usize = 10;
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// Comparison type reported for platform-sourced results
pub const COMPARISON_YOUTUBE: &str = "youtube";

/// Cosine similarity in [-1, 1]
///
/// 0 when either vector is empty, has zero norm, or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Result of scoring one pair
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityOutcome {
    Persisted(SimilarityEdge),
    /// Scored, but the edge could not be stored
    Unpersisted { edge: SimilarityEdge, error: String },
}

impl SimilarityOutcome {
    pub fn edge(&self) -> &SimilarityEdge {
        match self {
            SimilarityOutcome::Persisted(edge) => edge,
            SimilarityOutcome::Unpersisted { edge, .. } => edge,
        }
    }

    pub fn into_edge(self) -> SimilarityEdge {
        match self {
            SimilarityOutcome::Persisted(edge) => edge,
            SimilarityOutcome::Unpersisted { edge, .. } => edge,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, SimilarityOutcome::Persisted(_))
    }
}

/// A video with its similarity to the query video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedVideo {
    pub video: Video,
    pub score: f64,
    pub comparison_type: String,
}

pub struct SimilarityEngine {
    db: SqlitePool,
    related: Option<Arc<dyn RelatedVideosSource>>,
}

impl SimilarityEngine {
    pub fn new(db: SqlitePool, related: Option<Arc<dyn RelatedVideosSource>>) -> Self {
        Self { db, related }
    }

    async fn vector(&self, video_id: Uuid, kind: EmbeddingType) -> PipelineResult<Option<Vec<f32>>> {
        Ok(embeddings::get_embedding(&self.db, video_id, kind)
            .await?
            .map(|e| e.vector))
    }

    async fn field_score(&self, a: Uuid, b: Uuid, kind: EmbeddingType) -> PipelineResult<f64> {
        match (self.vector(a, kind).await?, self.vector(b, kind).await?) {
            (Some(va), Some(vb)) => Ok(cosine_similarity(&va, &vb)),
            _ => Ok(0.0),
        }
    }

    /// Score `a` against `b` and store the edge
    ///
    /// Both combined vectors are required. A failed write is reported in the
    /// outcome rather than as an error.
    pub async fn compute(&self, a: Uuid, b: Uuid) -> PipelineResult<SimilarityOutcome> {
        if a == b {
            return Err(PipelineError::InvalidInput(format!(
                "cannot compare video {} with itself",
                a
            )));
        }

        let combined_a = self
            .vector(a, EmbeddingType::Combined)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("combined embedding for {}", a)))?;
        let combined_b = self
            .vector(b, EmbeddingType::Combined)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("combined embedding for {}", b)))?;

        let (video_a, video_b) = clipmind_common::db::canonical_pair(a, b);
        let edge = SimilarityEdge {
            video_a,
            video_b,
            title_score: self.field_score(a, b, EmbeddingType::Title).await?,
            description_score: self.field_score(a, b, EmbeddingType::Description).await?,
            transcript_score: self.field_score(a, b, EmbeddingType::Transcript).await?,
            combined_score: cosine_similarity(&combined_a, &combined_b),
        };

        match similarities::upsert_edge(&self.db, &edge).await {
            Ok(()) => {
                debug!(video_a = %edge.video_a, video_b = %edge.video_b, score = edge.combined_score, "Stored similarity");
                Ok(SimilarityOutcome::Persisted(edge))
            }
            Err(e) => {
                warn!(video_a = %edge.video_a, video_b = %edge.video_b, error = %e, "Failed to store similarity");
                Ok(SimilarityOutcome::Unpersisted {
                    edge,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Score `video_id` against every other embedded video
    ///
    /// Returns the `limit` best edges at or above `min_score`.
    pub async fn compare_with_corpus(
        &self,
        video_id: Uuid,
        limit: usize,
        min_score: f64,
    ) -> PipelineResult<Vec<SimilarityEdge>> {
        let others = embeddings::videos_with_combined(&self.db, video_id).await?;

        let mut edges = Vec::with_capacity(others.len());
        for other in others {
            match self.compute(video_id, other).await {
                Ok(outcome) => edges.push(outcome.into_edge()),
                Err(PipelineError::NotFound(msg)) => {
                    warn!(video_id = %video_id, other = %other, "Skipping comparison: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        edges.retain(|e| e.combined_score >= min_score);
        edges.sort_by(|x, y| y.combined_score.total_cmp(&x.combined_score));
        edges.truncate(limit);

        info!(video_id = %video_id, matches = edges.len(), "Compared with corpus");
        Ok(edges)
    }

    /// Persisted edges of `video_id`, best first
    pub async fn stored_neighbours(
        &self,
        video_id: Uuid,
        limit: i64,
        min_score: f64,
    ) -> PipelineResult<Vec<SimilarityEdge>> {
        Ok(similarities::neighbours(&self.db, video_id, limit, min_score).await?)
    }

    /// Related videos according to the platform
    ///
    /// Candidates already stored locally are returned as stored; the rest as
    /// minimal pending records with a nil id. Scores are not computed here, so
    /// `min_score` does not filter.
    pub async fn find_similar(
        &self,
        video_id: Uuid,
        limit: i64,
        _min_score: f64,
    ) -> PipelineResult<Vec<RankedVideo>> {
        let video = videos::get_video(&self.db, video_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("video {}", video_id)))?;

        let related = self.related.as_ref().ok_or_else(|| {
            PipelineError::Config("related video discovery is not configured".to_string())
        })?;

        if limit <= 0 {
            return Ok(Vec::new());
        }

        let candidates = related.related(&video.external_id, limit as usize).await?;

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates.into_iter().take(limit as usize) {
            let local = videos::get_video_by_external_id(&self.db, &candidate.external_id).await?;
            let video = match local {
                Some(stored) => stored,
                None => {
                    let mut synthetic = Video::new(candidate.external_id, candidate.title)
                        .with_description(candidate.description)
                        .with_duration(candidate.duration_seconds);
                    synthetic.id = Uuid::nil();
                    synthetic.channel_id = Some(candidate.channel_id).filter(|c| !c.is_empty());
                    synthetic.channel_name = Some(candidate.channel_name).filter(|c| !c.is_empty());
                    synthetic
                }
            };
            results.push(RankedVideo {
                video,
                score: 0.0,
                comparison_type: COMPARISON_YOUTUBE.to_string(),
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_never_exceeds_one() {
        let v = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let score = cosine_similarity(&v, &v);
        assert!(score <= 1.0 && score >= 0.999_999);
    }

    #[test]
    fn test_outcome_accessors() {
        let edge = SimilarityEdge {
            video_a: Uuid::nil(),
            video_b: Uuid::new_v4(),
            title_score: 0.0,
            description_score: 0.0,
            transcript_score: 0.0,
            combined_score: 0.9,
        };
        let outcome = SimilarityOutcome::Unpersisted {
            edge: edge.clone(),
            error: "locked".into(),
        };
        assert!(!outcome.is_persisted());
        assert_eq!(outcome.edge(), &edge);
    }
}
