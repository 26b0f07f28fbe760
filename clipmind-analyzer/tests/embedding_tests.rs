//! Embedding engine with a deterministic provider

mod helpers;

use clipmind_analyzer::db::{embeddings, transcripts, usage};
use clipmind_analyzer::services::embedding::{chunk_text, mean_pool, CHUNK_OVERLAP_WORDS, CHUNK_WORDS};
use clipmind_analyzer::services::EmbeddingEngine;
use clipmind_analyzer::PipelineError;
use clipmind_common::db::{EmbeddingType, Transcript, TranscriptSource, Video};
use helpers::{vector_for, FakeLlm, TestApp, TestAppBuilder};
use std::sync::atomic::Ordering;

fn engine(app: &TestApp) -> EmbeddingEngine {
    EmbeddingEngine::new(app.state.db.clone(), app.state.providers.clone(), app.state.costs.clone())
}

#[tokio::test]
async fn test_full_set_is_persisted_with_usage() {
    let app = TestAppBuilder::default().build().await;
    let video = app.insert_video("full", "A title", "A description").await;

    let set = engine(&app)
        .embed(&video, Some("spoken transcript words".to_string()))
        .await
        .unwrap();
    assert_eq!(set.title, Some(vector_for("A title")));
    assert_eq!(set.description, Some(vector_for("A description")));
    assert_eq!(set.transcript, Some(vector_for("spoken transcript words")));
    assert_eq!(set.model, "fake-embed");

    let stored = embeddings::get_embeddings(&app.state.db, video.id).await.unwrap();
    assert_eq!(stored.len(), 4);
    let combined = stored
        .iter()
        .find(|e| e.embedding_type == EmbeddingType::Combined)
        .unwrap();
    assert_eq!(combined.vector, set.combined);

    let records = usage::usage_for_video(&app.state.db, video.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, "embedding");
    assert_eq!(records[0].provider, "ollama");
    assert_eq!(records[0].cost_usd, 0.0);
}

#[tokio::test]
async fn test_provider_failure_persists_nothing() {
    let app = TestAppBuilder::default().llm(FakeLlm::failing(1)).build().await;
    let video = app.insert_video("fails", "Title", "Description").await;

    let err = engine(&app).embed(&video, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Provider(_)));
    assert!(err.retryable());

    assert!(embeddings::get_embeddings(&app.state.db, video.id).await.unwrap().is_empty());
    assert!(usage::usage_for_video(&app.state.db, video.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stored_transcript_used_when_none_supplied() {
    let app = TestAppBuilder::default().build().await;
    let video = app.insert_video("stored", "Title", "").await;
    let transcript = Transcript::new(
        video.id,
        "en",
        TranscriptSource::Youtube,
        "previously stored words",
        Vec::new(),
    );
    transcripts::save_transcript(&app.state.db, &transcript).await.unwrap();

    let set = engine(&app).embed(&video, Some("   ".to_string())).await.unwrap();
    assert_eq!(set.transcript, Some(vector_for("previously stored words")));
    assert!(set.description.is_none());
    assert_eq!(app.llm.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_long_transcript_is_chunked_and_pooled() {
    let app = TestAppBuilder::default().build().await;
    let video = app.insert_video("long", "Title", "").await;
    let text: String = (0..1200).map(|i| format!("word{} ", i)).collect();

    let set = engine(&app).embed(&video, Some(text.clone())).await.unwrap();

    let chunks = chunk_text(&text, CHUNK_WORDS, CHUNK_OVERLAP_WORDS);
    assert_eq!(chunks.len(), 3);
    let expected = mean_pool(&chunks.iter().map(|c| vector_for(c)).collect::<Vec<_>>()).unwrap();
    assert_eq!(set.transcript, Some(expected));
    assert_eq!(app.llm.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_video_without_text_is_rejected() {
    let app = TestAppBuilder::default().build().await;
    let video = Video::new("blank", "   ");
    clipmind_analyzer::db::videos::insert_video(&app.state.db, &video)
        .await
        .unwrap();

    let err = engine(&app).embed(&video, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert!(!err.retryable());
    assert_eq!(app.llm.embed_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_embedding_overwrites_rows() {
    let app = TestAppBuilder::default().build().await;
    let video = app.insert_video("twice", "Title", "Description").await;
    let engine = engine(&app);

    engine.embed(&video, Some("first transcript".to_string())).await.unwrap();
    let second = engine
        .embed(&video, Some("second transcript".to_string()))
        .await
        .unwrap();

    let stored = embeddings::get_embeddings(&app.state.db, video.id).await.unwrap();
    assert_eq!(stored.len(), 4);
    let transcript = stored
        .iter()
        .find(|e| e.embedding_type == EmbeddingType::Transcript)
        .unwrap();
    assert_eq!(Some(&transcript.vector), second.transcript.as_ref());

    // The usage ledger is append-only
    assert_eq!(usage::usage_for_video(&app.state.db, video.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cleared_description_drops_its_vector() {
    let app = TestAppBuilder::default().build().await;
    let video = app.insert_video("edited", "Title", "Old description").await;
    let engine = engine(&app);

    engine.embed(&video, Some("words".to_string())).await.unwrap();
    assert_eq!(embeddings::get_embeddings(&app.state.db, video.id).await.unwrap().len(), 4);

    let edited = Video {
        description: String::new(),
        ..video.clone()
    };
    let second = engine.embed(&edited, Some("words".to_string())).await.unwrap();
    assert!(second.description.is_none());

    let stored = embeddings::get_embeddings(&app.state.db, video.id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|e| e.embedding_type != EmbeddingType::Description));
    let combined = stored
        .iter()
        .find(|e| e.embedding_type == EmbeddingType::Combined)
        .unwrap();
    assert_eq!(combined.vector, second.combined);
}
