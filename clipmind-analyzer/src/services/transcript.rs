//! Authoritative transcript per video
//!
//! Platform captions when the transcript provider is `youtube`, otherwise
//! speech-to-text over the locally stored audio.

use clipmind_common::db::{Transcript, TranscriptSource, Video};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use super::audio::AudioLocator;
use super::cost::{operations, CostRecorder};
use super::provider_cache::{ProviderCache, TranscriptionHandle};
use super::settings::SettingsStore;
use super::youtube::CaptionSource;
use crate::db::transcripts;
use crate::error::{PipelineError, PipelineResult};
use crate::providers::{ProviderError, TranscribeRequest, TranscribeTask};

/// Longest video sent to speech-to-text (4 hours)
pub const MAX_TRANSCRIBE_SECONDS: i64 = 4 * 60 * 60;

pub struct TranscriptService {
    db: SqlitePool,
    providers: Arc<ProviderCache>,
    captions: Option<Arc<dyn CaptionSource>>,
    audio: Arc<dyn AudioLocator>,
    settings: Arc<dyn SettingsStore>,
    costs: CostRecorder,
}

impl TranscriptService {
    pub fn new(
        db: SqlitePool,
        providers: Arc<ProviderCache>,
        captions: Option<Arc<dyn CaptionSource>>,
        audio: Arc<dyn AudioLocator>,
        settings: Arc<dyn SettingsStore>,
        costs: CostRecorder,
    ) -> Self {
        Self {
            db,
            providers,
            captions,
            audio,
            settings,
            costs,
        }
    }

    pub async fn get(&self, video: &Video) -> PipelineResult<Option<Transcript>> {
        Ok(transcripts::get_transcript(&self.db, video.id).await?)
    }

    /// Stored transcript, or a freshly produced and persisted one
    pub async fn get_or_create(&self, video: &Video) -> PipelineResult<Transcript> {
        if let Some(existing) = self.get(video).await? {
            return Ok(existing);
        }

        let language = self.preferred_language().await;

        let (transcript, provider, model) = match self.providers.transcription().await? {
            TranscriptionHandle::PlatformCaptions => {
                let source = self.captions.as_ref().ok_or_else(|| {
                    PipelineError::Config("platform captions are not configured".to_string())
                })?;

                let track = source
                    .captions(&video.external_id, language.as_deref())
                    .await?
                    .ok_or_else(|| {
                        PipelineError::NotFound(format!("no captions for {}", video.external_id))
                    })?;

                let content = track.text();
                let transcript = Transcript::new(
                    video.id,
                    track.language,
                    TranscriptSource::Youtube,
                    content,
                    track.segments,
                );
                (transcript, "youtube".to_string(), "captions".to_string())
            }
            TranscriptionHandle::SpeechToText(provider) => {
                if video.duration_seconds > MAX_TRANSCRIBE_SECONDS {
                    return Err(ProviderError::AudioTooLong.into());
                }

                let audio_path = self.audio.locate(video).await?;
                let response = provider
                    .transcribe(&TranscribeRequest {
                        audio_path,
                        language: language.clone(),
                        task: TranscribeTask::Transcribe,
                    })
                    .await?;

                let detected = if response.language.is_empty() {
                    language.clone().unwrap_or_else(|| "unknown".to_string())
                } else {
                    response.language
                };

                let info = provider.model_info();
                let transcript = Transcript::new(
                    video.id,
                    detected,
                    TranscriptSource::Whisper,
                    response.text,
                    response.segments,
                );
                (transcript, info.provider, info.name)
            }
        };

        if transcript.content.trim().is_empty() {
            return Err(PipelineError::NotFound(format!(
                "transcript for {} is empty",
                video.external_id
            )));
        }

        transcripts::save_transcript(&self.db, &transcript).await?;

        // Caption fetches are free but still leave a usage trail
        self.costs
            .record(
                Some(video.id),
                operations::TRANSCRIPTION,
                &provider,
                &model,
                (transcript.content.chars().count() / 4) as i64,
                0,
            )
            .await?;

        info!(
            video_id = %video.id,
            source = transcript.source.as_str(),
            language = %transcript.language,
            segments = transcript.segments.len(),
            "Stored transcript"
        );
        Ok(transcript)
    }

    /// `summary_language`, with "auto" meaning no preference
    async fn preferred_language(&self) -> Option<String> {
        match self.settings.load().await {
            Ok(settings) => Some(settings.summary_language)
                .filter(|l| !l.trim().is_empty() && l.as_str() != "auto"),
            Err(e) => {
                warn!(error = %e, "Failed to read settings, letting the provider detect language");
                None
            }
        }
    }
}
