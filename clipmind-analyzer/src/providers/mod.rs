//! External model providers
//!
//! Two capability traits, one per provider kind:
//! - [`LlmProvider`]: completion plus text embeddings (Gemini, Ollama)
//! - [`TranscriptionProvider`]: speech-to-text (Groq, local Whisper service, Hugging Face)
//!
//! Handles are cheap to share (`Arc<dyn ...>`) and are memoized by
//! [`crate::services::provider_cache::ProviderCache`].

pub mod gemini;
pub mod ollama;
pub mod whisper;

use async_trait::async_trait;
use clipmind_common::db::TranscriptSegment;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use whisper::{GroqWhisperProvider, HuggingFaceWhisperProvider, LocalWhisperProvider};

pub(crate) const USER_AGENT: &str = concat!("ClipMind/", env!("CARGO_PKG_VERSION"));

/// Provider failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Audio file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Audio exceeds maximum duration")]
    AudioTooLong,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn sub_code(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "PROVIDER_UNAVAILABLE",
            ProviderError::RateLimited => "PROVIDER_RATE_LIMITED",
            ProviderError::InvalidKey => "PROVIDER_CONFIG_MISSING",
            ProviderError::UnknownProvider(_) => "PROVIDER_NOT_FOUND",
            ProviderError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            ProviderError::FileTooLarge { .. } => "PROVIDER_FILE_TOO_LARGE",
            ProviderError::AudioTooLong => "AUDIO_TOO_LONG",
            ProviderError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::InvalidKey,
            404 => ProviderError::ModelNotFound(truncate(body, 200)),
            413 => ProviderError::FileTooLarge { size: 0, max: 0 },
            429 => ProviderError::RateLimited,
            _ => ProviderError::Unavailable(format!("HTTP {}: {}", status, truncate(body, 200))),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Model metadata reported by a handle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Model name used for pricing and embedding tags
    pub name: String,
    /// Provider name ("gemini", "ollama", "groq", "local", "huggingface")
    pub provider: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Completion and embedding capability
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed many texts; output order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscribeTask {
    Transcribe,
    Translate,
}

impl TranscribeTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscribeTask::Transcribe => "transcribe",
            TranscribeTask::Translate => "translate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub audio_path: PathBuf,
    /// None lets the provider detect the language
    pub language: Option<String>,
    pub task: TranscribeTask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeResponse {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
    pub segments: Vec<TranscriptSegment>,
}

/// Speech-to-text capability
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<TranscribeResponse, ProviderError>;

    fn model_info(&self) -> ModelInfo;
}

/// Shared reqwest client setup for provider handles
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(e.to_string()))
}

/// Read an audio file for upload, enforcing a size cap
pub(crate) async fn read_audio(path: &std::path::Path, max_bytes: u64) -> Result<Vec<u8>, ProviderError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| ProviderError::Unavailable(format!("Read audio {} failed: {}", path.display(), e)))?;

    if metadata.len() > max_bytes {
        return Err(ProviderError::FileTooLarge {
            size: metadata.len(),
            max: max_bytes,
        });
    }

    tokio::fs::read(path)
        .await
        .map_err(|e| ProviderError::Unavailable(format!("Read audio {} failed: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status(401, ""), ProviderError::InvalidKey);
        assert_eq!(ProviderError::from_status(429, ""), ProviderError::RateLimited);
        assert!(matches!(
            ProviderError::from_status(404, "no such model"),
            ProviderError::ModelNotFound(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "loading"),
            ProviderError::Unavailable(_)
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match ProviderError::from_status(500, &body) {
            ProviderError::Unavailable(msg) => assert!(msg.len() < 300),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_audio_enforces_size_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        assert_eq!(read_audio(&path, 128).await.unwrap().len(), 64);
        assert!(matches!(
            read_audio(&path, 32).await,
            Err(ProviderError::FileTooLarge { size: 64, max: 32 })
        ));
    }
}
