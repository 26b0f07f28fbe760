//! Speech-to-text clients
//!
//! Three backends share one response shape: Groq's hosted Whisper
//! (OpenAI-compatible), a self-hosted faster-whisper service, and the
//! Hugging Face inference API.

use async_trait::async_trait;
use clipmind_common::db::TranscriptSegment;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use super::{
    http_client, read_audio, ModelInfo, ProviderError, TranscribeRequest, TranscribeResponse,
    TranscriptionProvider,
};

const GROQ_TRANSCRIPTIONS_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const GROQ_MODEL: &str = "whisper-large-v3";
/// Groq rejects uploads above 25 MB
const GROQ_MAX_BYTES: u64 = 25 * 1024 * 1024;

pub const DEFAULT_LOCAL_WHISPER_URL: &str = "http://localhost:8001";
const LOCAL_MODEL_NAME: &str = "faster-whisper";
const LOCAL_MAX_BYTES: u64 = 500 * 1024 * 1024;

const HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";
const HUGGINGFACE_MODEL: &str = "openai/whisper-large-v3";
const HUGGINGFACE_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// OpenAI-style verbose transcription payload (Groq and the local service)
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl From<VerboseTranscription> for TranscribeResponse {
    fn from(v: VerboseTranscription) -> Self {
        TranscribeResponse {
            text: v.text.trim().to_string(),
            language: v.language,
            duration_seconds: v.duration,
            segments: v
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        }
    }
}

fn file_part(audio: Vec<u8>, request: &TranscribeRequest) -> Result<Part, ProviderError> {
    let file_name = request
        .audio_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.mp3".to_string());

    Part::bytes(audio)
        .file_name(file_name)
        .mime_str("application/octet-stream")
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

async fn read_success(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status.as_u16(), &text));
    }
    Ok(text)
}

fn parse_verbose(body: &str) -> Result<TranscribeResponse, ProviderError> {
    serde_json::from_str::<VerboseTranscription>(body)
        .map(TranscribeResponse::from)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

// ============================================================================
// Groq
// ============================================================================

pub struct GroqWhisperProvider {
    http_client: reqwest::Client,
    api_key: String,
}

impl GroqWhisperProvider {
    pub fn new(api_key: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidKey);
        }
        Ok(Self {
            http_client: http_client(Duration::from_secs(600))?,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionProvider for GroqWhisperProvider {
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<TranscribeResponse, ProviderError> {
        let audio = read_audio(&request.audio_path, GROQ_MAX_BYTES).await?;

        let mut form = Form::new()
            .part("file", file_part(audio, request)?)
            .text("model", GROQ_MODEL)
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");
        if let Some(language) = request.language.as_deref().filter(|l| *l != "auto") {
            form = form.text("language", language.to_string());
        }

        let response = self
            .http_client
            .post(GROQ_TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        parse_verbose(&read_success(response).await?)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: GROQ_MODEL.to_string(),
            provider: "groq".to_string(),
            max_tokens: 0,
        }
    }
}

// ============================================================================
// Local faster-whisper service
// ============================================================================

pub struct LocalWhisperProvider {
    http_client: reqwest::Client,
    base_url: String,
}

impl LocalWhisperProvider {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_LOCAL_WHISPER_URL
        } else {
            base_url.trim()
        };
        Ok(Self {
            // Long videos take minutes on CPU
            http_client: http_client(Duration::from_secs(600))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// True if the service answers its health endpoint within `timeout`
    pub async fn is_healthy(&self, timeout: Duration) -> bool {
        let request = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .timeout(timeout)
            .send();

        matches!(request.await, Ok(response) if response.status().is_success())
    }
}

#[async_trait]
impl TranscriptionProvider for LocalWhisperProvider {
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<TranscribeResponse, ProviderError> {
        let audio = read_audio(&request.audio_path, LOCAL_MAX_BYTES).await?;

        let mut form = Form::new()
            .part("file", file_part(audio, request)?)
            .text("task", request.task.as_str());
        if let Some(language) = request.language.as_deref().filter(|l| *l != "auto") {
            form = form.text("language", language.to_string());
        }

        let response = self
            .http_client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await?;

        parse_verbose(&read_success(response).await?)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: LOCAL_MODEL_NAME.to_string(),
            provider: "local".to_string(),
            max_tokens: 0,
        }
    }
}

// ============================================================================
// Hugging Face inference API
// ============================================================================

pub struct HuggingFaceWhisperProvider {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    chunks: Vec<HuggingFaceChunk>,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceChunk {
    text: String,
    #[serde(default)]
    timestamp: Vec<Option<f64>>,
}

impl HuggingFaceWhisperProvider {
    pub fn new(api_key: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidKey);
        }
        Ok(Self {
            http_client: http_client(Duration::from_secs(300))?,
            api_key: api_key.to_string(),
            base_url: HUGGINGFACE_BASE_URL.to_string(),
        })
    }
}

/// The inference API returns either JSON or a bare (possibly quoted) string
fn parse_huggingface(body: &str) -> Result<TranscribeResponse, ProviderError> {
    let parsed = match serde_json::from_str::<HuggingFaceTranscription>(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            let text = body.trim().trim_matches('"').trim();
            if text.is_empty() {
                return Err(ProviderError::InvalidResponse(e.to_string()));
            }
            HuggingFaceTranscription {
                text: text.to_string(),
                chunks: Vec::new(),
            }
        }
    };

    let segments = if parsed.chunks.is_empty() {
        vec![TranscriptSegment {
            start: 0.0,
            end: 0.0,
            text: parsed.text.trim().to_string(),
        }]
    } else {
        parsed
            .chunks
            .into_iter()
            .map(|c| TranscriptSegment {
                start: c.timestamp.first().copied().flatten().unwrap_or(0.0),
                end: c.timestamp.get(1).copied().flatten().unwrap_or(0.0),
                text: c.text.trim().to_string(),
            })
            .collect()
    };

    let duration_seconds = segments.last().map(|s| s.end).unwrap_or(0.0);

    Ok(TranscribeResponse {
        text: parsed.text.trim().to_string(),
        language: String::new(),
        duration_seconds,
        segments,
    })
}

#[async_trait]
impl TranscriptionProvider for HuggingFaceWhisperProvider {
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<TranscribeResponse, ProviderError> {
        let audio = read_audio(&request.audio_path, HUGGINGFACE_MAX_BYTES).await?;

        let response = self
            .http_client
            .post(format!("{}/models/{}", self.base_url, HUGGINGFACE_MODEL))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 503 {
            return Err(ProviderError::Unavailable(
                "Hugging Face model is loading, try again later".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        parse_huggingface(&body)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: HUGGINGFACE_MODEL.to_string(),
            provider: "huggingface".to_string(),
            max_tokens: 0,
        }
    }
}
