//! Provider handle memoization and selection

mod helpers;

use async_trait::async_trait;
use clipmind_analyzer::db::settings::set_settings;
use clipmind_analyzer::services::settings::Settings;
use clipmind_analyzer::providers::{LlmProvider, ProviderError, TranscriptionProvider};
use clipmind_analyzer::services::provider_cache::ProviderSpec;
use clipmind_analyzer::services::{
    Operation, ProviderBuilder, ProviderCache, SettingsStore, SqliteSettingsStore,
    TranscriptionHandle,
};
use clipmind_analyzer::{PipelineError, PipelineResult};
use clipmind_common::db::init_memory_database;
use helpers::{static_config, FakeBuilder, FakeLlm, TestAppBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store whose reads always fail
struct BrokenStore;

#[async_trait]
impl SettingsStore for BrokenStore {
    async fn load(&self) -> PipelineResult<Settings> {
        Err(PipelineError::Persistence("settings table locked".to_string()))
    }

    async fn save(&self, _settings: &Settings) -> PipelineResult<()> {
        Err(PipelineError::Persistence("settings table locked".to_string()))
    }
}

/// Builder that takes a while, widening the window for racing misses
struct SlowBuilder {
    inner: FakeBuilder,
    delay: Duration,
    builds: AtomicU32,
}

impl ProviderBuilder for SlowBuilder {
    fn build_llm(&self, spec: &ProviderSpec) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.build_llm(spec)
    }

    fn build_transcription(&self, spec: &ProviderSpec) -> Result<Arc<dyn TranscriptionProvider>, ProviderError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build_transcription(spec)
    }
}

#[tokio::test]
async fn test_same_configuration_reuses_handle() {
    let app = TestAppBuilder::default().build().await;

    let first = app.state.providers.llm(Operation::Embedding).await.unwrap();
    let second = app.state.providers.llm(Operation::Embedding).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(app.builder.llm_builds.load(Ordering::SeqCst), 1);
    assert_eq!(app.state.providers.len(), 1);
}

#[tokio::test]
async fn test_changed_settings_build_a_new_handle() {
    let app = TestAppBuilder::default().build().await;
    app.state.providers.llm(Operation::Embedding).await.unwrap();

    set_settings(
        &app.state.db,
        &[
            ("embedding_provider", "ollama".to_string()),
            ("ollama_model", "nomic-embed-text".to_string()),
        ],
    )
    .await
    .unwrap();

    app.state.providers.llm(Operation::Embedding).await.unwrap();
    assert_eq!(app.builder.llm_builds.load(Ordering::SeqCst), 2);
    assert_eq!(app.state.providers.len(), 2);

    let specs = app.builder.specs.lock().unwrap();
    assert_eq!(specs[1].provider, "ollama");
    assert_eq!(specs[1].model, "nomic-embed-text");
    assert_eq!(specs[1].endpoint, "http://localhost:11434");
}

#[tokio::test]
async fn test_secret_change_is_a_new_key_without_exposing_it() {
    let app = TestAppBuilder::default().build().await;
    set_settings(&app.state.db, &[("gemini_api_key", "first-secret".to_string())])
        .await
        .unwrap();
    app.state.providers.llm(Operation::Summary).await.unwrap();

    set_settings(&app.state.db, &[("gemini_api_key", "second-secret".to_string())])
        .await
        .unwrap();
    app.state.providers.llm(Operation::Summary).await.unwrap();
    assert_eq!(app.builder.llm_builds.load(Ordering::SeqCst), 2);

    let specs = app.builder.specs.lock().unwrap();
    let key = specs[1].key();
    assert!(!key.to_string().contains("second-secret"));
    assert!(!format!("{:?}", specs[1]).contains("second-secret"));
    assert_ne!(specs[0].key(), key);
}

#[tokio::test]
async fn test_unrelated_setting_keeps_other_handles() {
    let app = TestAppBuilder::default().build().await;
    app.state.providers.llm(Operation::Embedding).await.unwrap();

    // Embedding uses gemini; the ollama model is not part of its key
    set_settings(&app.state.db, &[("ollama_model", "mistral".to_string())])
        .await
        .unwrap();
    app.state.providers.llm(Operation::Embedding).await.unwrap();

    assert_eq!(app.builder.llm_builds.load(Ordering::SeqCst), 1);
    assert_eq!(app.state.providers.len(), 1);
}

#[tokio::test]
async fn test_clear_drops_every_handle() {
    let app = TestAppBuilder::default().build().await;
    set_settings(&app.state.db, &[("transcript_provider", "groq".to_string())])
        .await
        .unwrap();

    app.state.providers.llm(Operation::Embedding).await.unwrap();
    app.state.providers.transcription().await.unwrap();
    assert_eq!(app.state.providers.len(), 2);

    app.state.providers.clear();
    assert!(app.state.providers.is_empty());

    app.state.providers.llm(Operation::Embedding).await.unwrap();
    assert_eq!(app.builder.builds(), 3);
}

#[tokio::test]
async fn test_caption_transcripts_need_no_handle() {
    let app = TestAppBuilder::default().build().await;

    let handle = app.state.providers.transcription().await.unwrap();
    assert!(matches!(handle, TranscriptionHandle::PlatformCaptions));
    assert_eq!(app.builder.transcription_builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_stored_provider_is_a_configuration_error() {
    let app = TestAppBuilder::default().build().await;
    set_settings(&app.state.db, &[("embedding_provider", "mystery".to_string())])
        .await
        .unwrap();

    let err = app.state.providers.llm(Operation::Embedding).await.err().unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(!err.retryable());
    assert_eq!(app.builder.builds(), 0);
}

#[tokio::test]
async fn test_unreadable_settings_fall_back_to_static_configuration() {
    let builder = Arc::new(FakeBuilder::new(Arc::new(FakeLlm::default())));
    let cache = ProviderCache::new(Arc::new(BrokenStore), static_config(), builder.clone());

    cache.llm(Operation::Embedding).await.unwrap();
    match cache.transcription().await.unwrap() {
        TranscriptionHandle::SpeechToText(_) => {}
        TranscriptionHandle::PlatformCaptions => panic!("static configuration selects groq"),
    }

    let specs = builder.specs.lock().unwrap();
    assert_eq!(specs[0].provider, "gemini");
    assert_eq!(specs[1].provider, "groq");
    assert_eq!(specs[1].model, "base");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_build_one_handle() {
    let db = init_memory_database().await.unwrap();
    let builder = Arc::new(SlowBuilder {
        inner: FakeBuilder::new(Arc::new(FakeLlm::default())),
        delay: Duration::from_millis(50),
        builds: AtomicU32::new(0),
    });
    let cache = Arc::new(ProviderCache::new(
        Arc::new(SqliteSettingsStore::new(db)),
        static_config(),
        builder.clone(),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.llm(Operation::Embedding).await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(cache.len(), 1);
}
