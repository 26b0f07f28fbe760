//! YouTube platform access
//!
//! Two capabilities, each behind its own trait so they can be faked or left
//! unconfigured independently:
//! - [`CaptionSource`]: platform-native captions (timedtext, json3 format)
//! - [`RelatedVideosSource`]: related-video discovery (Data API v3 search)

use async_trait::async_trait;
use clipmind_common::db::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::providers::{http_client, ProviderError};

const DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";
/// Data API page size ceiling
const MAX_SEARCH_RESULTS: usize = 50;
const DEFAULT_SEARCH_RESULTS: usize = 10;
const DEFAULT_CAPTION_LANGUAGE: &str = "en";
/// Tags appended to the title when searching without a channel
const SEARCH_TAGS: usize = 3;

/// Captions for one video
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
}

impl CaptionTrack {
    /// Segment texts joined with single spaces
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Video metadata as reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelatedVideo {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_name: String,
    pub duration_seconds: i64,
    #[serde(skip)]
    pub tags: Vec<String>,
}

#[async_trait]
pub trait CaptionSource: Send + Sync {
    /// Captions in `language` (platform default if `None`); `Ok(None)` if the video has none
    async fn captions(
        &self,
        external_id: &str,
        language: Option<&str>,
    ) -> Result<Option<CaptionTrack>, ProviderError>;
}

#[async_trait]
pub trait RelatedVideosSource: Send + Sync {
    /// Up to `limit` videos related to `external_id`, never including it
    async fn related(&self, external_id: &str, limit: usize) -> Result<Vec<RelatedVideo>, ProviderError>;
}

pub struct YouTubeClient {
    http_client: reqwest::Client,
    api_key: String,
    api_base: String,
    timedtext_url: String,
}

// ----------------------------------------------------------------------------
// Wire formats
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Snippet,
    #[serde(rename = "contentDetails", default)]
    content_details: ContentDetails,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "channelId", default)]
    channel_id: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId", default)]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs", default)]
    start_ms: u64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: u64,
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

impl From<VideoItem> for RelatedVideo {
    fn from(item: VideoItem) -> Self {
        RelatedVideo {
            external_id: item.id,
            title: item.snippet.title,
            description: item.snippet.description,
            channel_id: item.snippet.channel_id,
            channel_name: item.snippet.channel_title,
            duration_seconds: parse_iso8601_duration(&item.content_details.duration),
            tags: item.snippet.tags,
        }
    }
}

/// Seconds in an ISO 8601 duration such as `PT1H2M10S` or `P1DT2H`; 0 if malformed
pub fn parse_iso8601_duration(value: &str) -> i64 {
    let Some(rest) = value.strip_prefix('P') else {
        return 0;
    };

    let mut total = 0i64;
    let mut number = String::new();
    let mut in_time = false;

    for c in rest.chars() {
        match c {
            '0'..='9' => number.push(c),
            'T' => in_time = true,
            unit => {
                let Ok(n) = number.parse::<i64>() else {
                    return 0;
                };
                number.clear();
                total += match (unit, in_time) {
                    ('D', false) => n * 86_400,
                    ('W', false) => n * 604_800,
                    ('H', true) => n * 3_600,
                    ('M', true) => n * 60,
                    ('S', true) => n,
                    _ => return 0,
                };
            }
        }
    }

    total
}

fn parse_timed_text(body: &str, language: &str) -> Result<Option<CaptionTrack>, ProviderError> {
    if body.trim().is_empty() {
        return Ok(None);
    }

    let parsed: TimedText =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    let segments: Vec<TranscriptSegment> = parsed
        .events
        .into_iter()
        .filter_map(|event| {
            let text = event
                .segs
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>()
                .replace('\n', " ")
                .trim()
                .to_string();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                start: event.start_ms as f64 / 1000.0,
                end: (event.start_ms + event.duration_ms) as f64 / 1000.0,
                text,
            })
        })
        .collect();

    if segments.is_empty() {
        return Ok(None);
    }

    Ok(Some(CaptionTrack {
        language: language.to_string(),
        segments,
    }))
}

impl YouTubeClient {
    pub fn new(api_key: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidKey);
        }
        Ok(Self {
            http_client: http_client(Duration::from_secs(30))?,
            api_key: api_key.trim().to_string(),
            api_base: DATA_API_BASE.to_string(),
            timedtext_url: TIMEDTEXT_URL.to_string(),
        })
    }

    pub fn with_base_urls(mut self, api_base: impl Into<String>, timedtext_url: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.timedtext_url = timedtext_url.into();
        self
    }

    /// GET with query parameters; the key is a query parameter, so URLs are
    /// stripped from transport errors
    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, ProviderError> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::from(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from(e.without_url()))?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    pub async fn video_info(&self, external_id: &str) -> Result<RelatedVideo, ProviderError> {
        let body = self
            .get_text(
                &format!("{}/videos", self.api_base),
                &[
                    ("id", external_id.to_string()),
                    ("part", "snippet,contentDetails".to_string()),
                    ("key", self.api_key.clone()),
                ],
            )
            .await?;

        let parsed: VideoListResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parsed
            .items
            .into_iter()
            .next()
            .map(RelatedVideo::from)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("video {} not found", external_id)))
    }

    fn search_query(&self, source: &RelatedVideo, max_results: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("type", "video".to_string()),
            ("part", "snippet".to_string()),
            ("maxResults", (max_results + 1).to_string()),
            ("key", self.api_key.clone()),
        ];

        if !source.channel_id.is_empty() {
            query.push(("channelId", source.channel_id.clone()));
            query.push(("order", "date".to_string()));
        } else {
            let mut terms = vec![source.title.as_str()];
            terms.extend(source.tags.iter().take(SEARCH_TAGS).map(String::as_str));
            query.push(("q", terms.join(" ").trim().to_string()));
            query.push(("order", "relevance".to_string()));
        }

        query
    }
}

#[async_trait]
impl RelatedVideosSource for YouTubeClient {
    async fn related(&self, external_id: &str, limit: usize) -> Result<Vec<RelatedVideo>, ProviderError> {
        let max_results = match limit {
            0 => DEFAULT_SEARCH_RESULTS,
            n => n.min(MAX_SEARCH_RESULTS),
        };

        let source = self.video_info(external_id).await?;
        let body = self
            .get_text(
                &format!("{}/search", self.api_base),
                &self.search_query(&source, max_results),
            )
            .await?;

        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut videos = Vec::new();
        for item in parsed.items {
            if item.id.video_id.is_empty() || item.id.video_id == external_id {
                continue;
            }

            // Full details when available, else what the search result carries
            let video = match self.video_info(&item.id.video_id).await {
                Ok(video) => video,
                Err(e) => {
                    debug!(external_id = %item.id.video_id, error = %e, "Using search snippet only");
                    RelatedVideo {
                        external_id: item.id.video_id,
                        title: item.snippet.title,
                        description: item.snippet.description,
                        channel_id: item.snippet.channel_id,
                        channel_name: item.snippet.channel_title,
                        duration_seconds: 0,
                        tags: Vec::new(),
                    }
                }
            };
            videos.push(video);

            if videos.len() >= max_results {
                break;
            }
        }

        info!(external_id, count = videos.len(), "Fetched related videos");
        Ok(videos)
    }
}

#[async_trait]
impl CaptionSource for YouTubeClient {
    async fn captions(
        &self,
        external_id: &str,
        language: Option<&str>,
    ) -> Result<Option<CaptionTrack>, ProviderError> {
        let language = language
            .filter(|l| !l.is_empty() && *l != "auto")
            .unwrap_or(DEFAULT_CAPTION_LANGUAGE);

        let body = self
            .get_text(
                &self.timedtext_url,
                &[
                    ("v", external_id.to_string()),
                    ("lang", language.to_string()),
                    ("fmt", "json3".to_string()),
                ],
            )
            .await?;

        parse_timed_text(&body, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT1H2M10S"), 3730);
        assert_eq!(parse_iso8601_duration("PT45S"), 45);
        assert_eq!(parse_iso8601_duration("P1DT1M"), 86_460);
        assert_eq!(parse_iso8601_duration(""), 0);
        assert_eq!(parse_iso8601_duration("PTXS"), 0);
    }

    #[test]
    fn test_timed_text_segments() {
        let body = r#"{"events": [
            {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "hello "}, {"utf8": "world"}]},
            {"tStartMs": 1500, "dDurationMs": 500, "segs": [{"utf8": "\n"}]},
            {"tStartMs": 2000, "dDurationMs": 1000, "segs": [{"utf8": "again"}]}
        ]}"#;

        let track = parse_timed_text(body, "en").unwrap().unwrap();
        assert_eq!(track.segments.len(), 2);
        assert_eq!(track.segments[0].end, 1.5);
        assert_eq!(track.text(), "hello world again");
    }

    #[test]
    fn test_empty_timed_text_means_no_captions() {
        assert!(parse_timed_text("", "en").unwrap().is_none());
        assert!(parse_timed_text(r#"{"events": []}"#, "en").unwrap().is_none());
    }

    #[test]
    fn test_search_by_channel_or_title_and_tags() {
        let client = YouTubeClient::new("k").unwrap();

        let with_channel = RelatedVideo {
            channel_id: "UC1".to_string(),
            ..Default::default()
        };
        let query = client.search_query(&with_channel, 10);
        assert!(query.contains(&("channelId", "UC1".to_string())));
        assert!(query.contains(&("maxResults", "11".to_string())));

        let without_channel = RelatedVideo {
            title: "Rust async".to_string(),
            tags: vec!["tokio".into(), "futures".into(), "axum".into(), "extra".into()],
            ..Default::default()
        };
        let query = client.search_query(&without_channel, 5);
        assert!(query.contains(&("q", "Rust async tokio futures axum".to_string())));
    }

    #[test]
    fn test_key_required() {
        assert!(matches!(YouTubeClient::new(" "), Err(ProviderError::InvalidKey)));
    }
}
