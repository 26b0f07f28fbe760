//! Shared fixtures for integration tests
//!
//! Fake providers and platform sources, an in-memory database and log, and an
//! [`AppState`] wired with fast retry timings.

#![allow(dead_code)]

use async_trait::async_trait;
use clipmind_analyzer::channel::RetryPolicy;
use clipmind_analyzer::pipeline::Workers;
use clipmind_analyzer::providers::{
    CompletionRequest, CompletionResponse, LlmProvider, ModelInfo, ProviderError,
    TranscribeRequest, TranscribeResponse, TranscriptionProvider,
};
use clipmind_analyzer::services::provider_cache::ProviderSpec;
use clipmind_analyzer::services::{
    CaptionSource, CaptionTrack, MediaDirectoryLocator, ProviderBuilder, RelatedVideo,
    RelatedVideosSource, StaticProviderConfig,
};
use clipmind_analyzer::transport::MemoryLog;
use clipmind_analyzer::{AppState, Collaborators, PipelineOptions};
use clipmind_common::config::{LlmConfig, WhisperConfig};
use clipmind_common::db::{init_memory_database, TranscriptSegment, Video, VideoStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const EMBEDDING_DIM: usize = 16;

/// Bag-of-bytes vector: identical text gives identical vectors
pub fn vector_for(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for byte in text.bytes() {
        v[byte as usize % EMBEDDING_DIM] += 1.0;
    }
    v
}

// ============================================================================
// Providers
// ============================================================================

/// Deterministic embeddings with injectable failures
#[derive(Default)]
pub struct FakeLlm {
    /// Calls that fail before calls start succeeding
    pub fail_next: AtomicU32,
    pub embed_calls: AtomicU32,
    pub batch_calls: AtomicU32,
}

impl FakeLlm {
    pub fn failing(times: u32) -> Self {
        let llm = Self::default();
        llm.fail_next.store(times, Ordering::SeqCst);
        llm
    }

    fn maybe_fail(&self) -> Result<(), ProviderError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.maybe_fail()?;
        Ok(CompletionResponse {
            content: format!("summary of {} chars", request.prompt.len()),
            input_tokens: request.prompt.len() as i64 / 4,
            output_tokens: 8,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "fake-embed".to_string(),
            provider: "ollama".to_string(),
            max_tokens: 2048,
        }
    }
}

pub struct FakeTranscriber {
    pub text: String,
}

#[async_trait]
impl TranscriptionProvider for FakeTranscriber {
    async fn transcribe(&self, _request: &TranscribeRequest) -> Result<TranscribeResponse, ProviderError> {
        Ok(TranscribeResponse {
            text: self.text.clone(),
            language: "en".to_string(),
            duration_seconds: 3.0,
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 3.0,
                text: self.text.clone(),
            }],
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "fake-whisper".to_string(),
            provider: "local".to_string(),
            max_tokens: 0,
        }
    }
}

/// Hands out the shared fakes and counts constructions
pub struct FakeBuilder {
    pub llm: Arc<FakeLlm>,
    pub transcriber: Arc<FakeTranscriber>,
    pub llm_builds: AtomicU32,
    pub transcription_builds: AtomicU32,
    /// Every spec seen, in order
    pub specs: Mutex<Vec<ProviderSpec>>,
}

impl FakeBuilder {
    pub fn new(llm: Arc<FakeLlm>) -> Self {
        Self {
            llm,
            transcriber: Arc::new(FakeTranscriber {
                text: "speech to text output".to_string(),
            }),
            llm_builds: AtomicU32::new(0),
            transcription_builds: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        }
    }

    pub fn builds(&self) -> u32 {
        self.llm_builds.load(Ordering::SeqCst) + self.transcription_builds.load(Ordering::SeqCst)
    }
}

impl ProviderBuilder for FakeBuilder {
    fn build_llm(&self, spec: &ProviderSpec) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.llm_builds.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        Ok(self.llm.clone())
    }

    fn build_transcription(&self, spec: &ProviderSpec) -> Result<Arc<dyn TranscriptionProvider>, ProviderError> {
        self.transcription_builds.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        Ok(self.transcriber.clone())
    }
}

// ============================================================================
// Platform sources
// ============================================================================

/// Captions keyed by external id
#[derive(Default)]
pub struct FakeCaptions {
    pub tracks: Mutex<HashMap<String, String>>,
}

impl FakeCaptions {
    pub fn with(self, external_id: &str, text: &str) -> Self {
        self.tracks
            .lock()
            .unwrap()
            .insert(external_id.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl CaptionSource for FakeCaptions {
    async fn captions(
        &self,
        external_id: &str,
        _language: Option<&str>,
    ) -> Result<Option<CaptionTrack>, ProviderError> {
        Ok(self.tracks.lock().unwrap().get(external_id).map(|text| CaptionTrack {
            language: "en".to_string(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 10.0,
                text: text.clone(),
            }],
        }))
    }
}

/// Fixed related-video answer
#[derive(Default)]
pub struct FakeRelated {
    pub videos: Mutex<Vec<RelatedVideo>>,
    pub calls: AtomicU32,
}

impl FakeRelated {
    pub fn with(videos: Vec<RelatedVideo>) -> Self {
        Self {
            videos: Mutex::new(videos),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RelatedVideosSource for FakeRelated {
    async fn related(&self, external_id: &str, limit: usize) -> Result<Vec<RelatedVideo>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .videos
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.external_id != external_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

pub fn related(external_id: &str, title: &str) -> RelatedVideo {
    RelatedVideo {
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: format!("about {}", title),
        channel_id: "UC-test".to_string(),
        channel_name: "Test Channel".to_string(),
        duration_seconds: 120,
        tags: Vec::new(),
    }
}

// ============================================================================
// Application
// ============================================================================

pub fn fast_options() -> PipelineOptions {
    PipelineOptions {
        publish_retries: 2,
        publish_backoff: Duration::from_millis(1),
        stage_deadline: Duration::from_secs(10),
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_step: Duration::from_millis(1),
        fetch_wait: Duration::from_millis(20),
        fetch_error_pause: Duration::from_millis(5),
    }
}

pub fn static_config() -> StaticProviderConfig {
    StaticProviderConfig {
        llm: LlmConfig::default(),
        whisper: WhisperConfig::default(),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub log: Arc<MemoryLog>,
    pub llm: Arc<FakeLlm>,
    pub builder: Arc<FakeBuilder>,
    pub captions: Arc<FakeCaptions>,
    pub related: Arc<FakeRelated>,
    pub media: TempDir,
}

/// Builder for [`TestApp`]
pub struct TestAppBuilder {
    llm: FakeLlm,
    captions: FakeCaptions,
    related: Option<FakeRelated>,
    options: PipelineOptions,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            llm: FakeLlm::default(),
            captions: FakeCaptions::default(),
            related: Some(FakeRelated::default()),
            options: fast_options(),
        }
    }
}

impl TestAppBuilder {
    pub fn llm(mut self, llm: FakeLlm) -> Self {
        self.llm = llm;
        self
    }

    pub fn captions(mut self, captions: FakeCaptions) -> Self {
        self.captions = captions;
        self
    }

    pub fn related(mut self, related: Option<FakeRelated>) -> Self {
        self.related = related;
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn build(self) -> TestApp {
        let db = init_memory_database().await.unwrap();
        let log = Arc::new(MemoryLog::new());
        let llm = Arc::new(self.llm);
        let builder = Arc::new(FakeBuilder::new(llm.clone()));
        let captions = Arc::new(self.captions);
        let related_source = self.related.map(Arc::new);
        let media = TempDir::new().unwrap();

        let collaborators = Collaborators {
            transport: log.clone(),
            providers: builder.clone(),
            captions: Some(captions.clone() as Arc<dyn CaptionSource>),
            related: related_source
                .clone()
                .map(|r| r as Arc<dyn RelatedVideosSource>),
            audio: Arc::new(MediaDirectoryLocator::new(media.path())),
        };

        let state = AppState::new(db, static_config(), collaborators, self.options);

        TestApp {
            state,
            log,
            llm,
            builder,
            captions,
            related: related_source.unwrap_or_default(),
            media,
        }
    }
}

pub async fn test_app() -> TestApp {
    TestAppBuilder::default().build().await
}

impl TestApp {
    /// Start the three stage workers against the app's log
    pub async fn start_workers(&self, cancel: CancellationToken) -> Workers {
        Workers::spawn(
            self.state.transport.clone(),
            self.state.executor.clone(),
            self.state.event_runner(),
            "test",
            fast_policy(),
            cancel,
        )
        .await
        .unwrap()
    }

    /// Store a video directly, without starting a run
    pub async fn insert_video(&self, external_id: &str, title: &str, description: &str) -> Video {
        let video = Video::new(external_id, title)
            .with_description(description)
            .with_duration(300);
        clipmind_analyzer::db::videos::insert_video(&self.state.db, &video)
            .await
            .unwrap();
        video
    }

    pub async fn status(&self, id: Uuid) -> VideoStatus {
        clipmind_analyzer::db::videos::require_video(&self.state.db, id)
            .await
            .unwrap()
            .status
    }

    /// Poll until `id` reaches `status` or `timeout` elapses
    pub async fn wait_for_status(&self, id: Uuid, status: VideoStatus, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.status(id).await == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Poll until `topic` holds at least `count` records
    pub async fn wait_for_records(&self, topic: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.log.records(topic).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
