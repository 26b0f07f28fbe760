//! Video endpoints
//!
//! CRUD plus the analysis trigger, summaries and per-video reads (transcript,
//! related videos, usage).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clipmind_common::db::{Summary, SummaryType, Transcript, UsageRecord, Video};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::videos;
use crate::pipeline::StartMode;
use crate::services::{RankedVideo, SummaryRequest};
use crate::{ApiError, ApiResult, AppState};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_SIMILAR_LIMIT: i64 = 10;

/// POST /api/v1/videos request
#[derive(Debug, Deserialize)]
pub struct CreateVideoRequest {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<i64>,
}

/// Video plus how its run was started
#[derive(Debug, Serialize)]
pub struct AnalysisStartedResponse {
    pub video: Video,
    pub mode: StartMode,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<Video>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub limit: Option<i64>,
    pub min_score: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SimilarResponse {
    pub video_id: Uuid,
    pub count: usize,
    pub similar: Vec<RankedVideo>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub video_id: Uuid,
    pub total_cost: f64,
    pub records: Vec<UsageRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub language: Option<String>,
}

/// POST /api/v1/videos/:id/summarize request
#[derive(Debug, Default, Deserialize)]
pub struct SummarizeRequest {
    /// "short" (default), "detailed" or "bullet_points"
    #[serde(default, rename = "type")]
    pub summary_type: Option<String>,
    #[serde(default)]
    pub from_audio: bool,
    #[serde(default)]
    pub language: Option<String>,
}

fn parse_video_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid video id: {}", raw)))
}

async fn load_video(state: &AppState, raw_id: &str) -> ApiResult<Video> {
    let id = parse_video_id(raw_id)?;
    videos::get_video(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Video {} not found", id)))
}

/// POST /api/v1/videos
///
/// Stores the video and starts its first run. 409 if the external id is
/// already known.
pub async fn create_video(
    State(state): State<AppState>,
    Json(request): Json<CreateVideoRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisStartedResponse>)> {
    let external_id = request.external_id.trim();
    if external_id.is_empty() {
        return Err(ApiError::BadRequest("external_id is required".to_string()));
    }
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if request.duration.is_some_and(|d| d < 0) {
        return Err(ApiError::BadRequest("duration cannot be negative".to_string()));
    }

    if videos::get_video_by_external_id(&state.db, external_id).await?.is_some() {
        return Err(ApiError::Conflict(format!("Video {} already exists", external_id)));
    }

    let mut video = Video::new(external_id, request.title.trim())
        .with_description(request.description.unwrap_or_default())
        .with_duration(request.duration.unwrap_or(0));
    video.channel_id = request.channel_id.filter(|c| !c.trim().is_empty());
    video.channel_name = request.channel_name.filter(|c| !c.trim().is_empty());

    videos::insert_video(&state.db, &video).await?;
    info!(video_id = %video.id, external_id = %video.external_id, "Video created");

    let handle = match state.orchestrator.start(&video).await {
        Ok(handle) => handle,
        Err(e) => {
            state.record_error(format!("Failed to start analysis: {}", e)).await;
            return Err(e.into());
        }
    };

    let video = videos::require_video(&state.db, video.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(AnalysisStartedResponse {
            video,
            mode: handle.mode,
        }),
    ))
}

/// GET /api/v1/videos
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<VideoListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let videos = videos::list_videos(&state.db, limit, offset).await?;
    let total = videos::count_videos(&state.db).await?;

    Ok(Json(VideoListResponse {
        videos,
        total,
        limit,
        offset,
    }))
}

/// GET /api/v1/videos/:id
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Video>> {
    Ok(Json(load_video(&state, &id).await?))
}

/// DELETE /api/v1/videos/:id
///
/// Transcript, embeddings, edges and usage rows go with it.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_video_id(&id)?;
    if !videos::delete_video(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Video {} not found", id)));
    }
    info!(video_id = %id, "Video deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/videos/:id/analyze
pub async fn analyze_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<AnalysisStartedResponse>)> {
    let id = parse_video_id(&id)?;
    let (video, handle) = state.orchestrator.reanalyze(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalysisStartedResponse {
            video,
            mode: handle.mode,
        }),
    ))
}

/// GET /api/v1/videos/:id/transcript
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Transcript>> {
    let video = load_video(&state, &id).await?;
    let transcript = state
        .transcripts
        .get(&video)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No transcript for video {}", video.id)))?;
    Ok(Json(transcript))
}

/// GET /api/v1/videos/:id/summary
///
/// Latest summary; a short one is generated on first request.
pub async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<Summary>> {
    let video = load_video(&state, &id).await?;
    let summary = state.summaries.get_or_generate(&video, query.language).await?;
    Ok(Json(summary))
}

/// POST /api/v1/videos/:id/summarize
pub async fn summarize_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SummarizeRequest>,
) -> ApiResult<(StatusCode, Json<Summary>)> {
    let summary_type = match request.summary_type.as_deref().map(str::trim) {
        None | Some("") => SummaryType::default(),
        Some(name) => name
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Unknown summary type: {}", name)))?,
    };
    let video = load_video(&state, &id).await?;

    let summary = state
        .summaries
        .generate(
            &video,
            SummaryRequest {
                summary_type,
                from_audio: request.from_audio,
                language: request.language,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /api/v1/videos/:id/similar
pub async fn get_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SimilarQuery>,
) -> ApiResult<Json<SimilarResponse>> {
    let id = parse_video_id(&id)?;
    let similar = state
        .similarity
        .find_similar(
            id,
            query.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT),
            query.min_score.unwrap_or(0.0),
        )
        .await?;

    Ok(Json(SimilarResponse {
        video_id: id,
        count: similar.len(),
        similar,
    }))
}

/// GET /api/v1/videos/:id/usage
pub async fn get_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UsageResponse>> {
    let video = load_video(&state, &id).await?;
    let records = state.costs.usage_for_video(video.id).await?;
    let total_cost = records.iter().map(|r| r.cost_usd).sum();

    Ok(Json(UsageResponse {
        video_id: video.id,
        total_cost,
        records,
    }))
}

pub fn video_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/videos", post(create_video).get(list_videos))
        .route("/api/v1/videos/:id", get(get_video).delete(delete_video))
        .route("/api/v1/videos/:id/analyze", post(analyze_video))
        .route("/api/v1/videos/:id/transcript", get(get_transcript))
        .route("/api/v1/videos/:id/summary", get(get_summary))
        .route("/api/v1/videos/:id/summarize", post(summarize_video))
        .route("/api/v1/videos/:id/similar", get(get_similar))
        .route("/api/v1/videos/:id/usage", get(get_usage))
}
