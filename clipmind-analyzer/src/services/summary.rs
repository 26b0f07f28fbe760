//! Transcript summaries
//!
//! A completion over the stored transcript (or a fresh speech-to-text pass of
//! the audio) produces the summary text; bullet lines under its key points
//! heading are kept alongside it.

use clipmind_common::db::{Summary, SummaryType, Video};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use super::audio::AudioLocator;
use super::cost::{operations, CostRecorder};
use super::provider_cache::{Operation, ProviderCache, TranscriptionHandle};
use super::settings::SettingsStore;
use super::transcript::{TranscriptService, MAX_TRANSCRIBE_SECONDS};
use crate::db::summaries;
use crate::error::{PipelineError, PipelineResult};
use crate::providers::{
    CompletionRequest, LlmProvider, ProviderError, TranscribeRequest, TranscribeTask,
};

const SYSTEM_PROMPT: &str = "You are an expert at analyzing and summarizing video content.";
const MAX_SUMMARY_TOKENS: u32 = 2000;
const TRANSCRIPT_PLACEHOLDER: &str = "{transcript}";

#[derive(Debug, Clone, Default)]
pub struct SummaryRequest {
    pub summary_type: SummaryType,
    /// Transcribe the audio again instead of using the stored transcript
    pub from_audio: bool,
    /// Language code, "auto", or `None` for the `summary_language` setting
    pub language: Option<String>,
}

/// "Provide your response in ..." for a language code or name
pub fn language_instruction(language: &str) -> String {
    let language = language.trim();
    if language.is_empty() || language.eq_ignore_ascii_case("auto") {
        return "Provide your response in the same language as the transcript.".to_string();
    }

    let name = match language.to_ascii_lowercase().as_str() {
        "en" => "English",
        "tr" => "Turkish",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "nl" => "Dutch",
        "pl" => "Polish",
        "sv" => "Swedish",
        "da" => "Danish",
        "no" => "Norwegian",
        "fi" => "Finnish",
        // Unknown codes pass through, they may already be a name
        _ => language,
    };
    format!("Provide your response in {}.", name)
}

fn template(summary_type: SummaryType) -> &'static str {
    match summary_type {
        SummaryType::Short => {
            "Summarize the transcript of this video.\n\
             Write 2-3 paragraphs covering the main topic and conclusions, then list \
             the 3-5 most important points.\n\n\
             Transcript:\n{transcript}\n\n\
             Answer in this format:\n\
             SUMMARY:\n<summary>\n\n\
             KEY POINTS:\n- <point>\n- <point>\n- <point>\n\n"
        }
        SummaryType::Detailed => {
            "Write a detailed summary of this video transcript.\n\
             Cover it in 4-5 paragraphs, then give the key takeaways, the topics \
             discussed and any actionable advice.\n\n\
             Transcript:\n{transcript}\n\n\
             Answer in this format:\n\
             SUMMARY:\n<summary>\n\n\
             KEY TAKEAWAYS:\n- <point>\n- <point>\n\n\
             TOPICS:\n- <topic>\n\n"
        }
        SummaryType::BulletPoints => {
            "List the main points of this video transcript as 5-10 bullets, \
             including notable facts, figures and quotes.\n\n\
             Transcript:\n{transcript}\n\n\
             Answer with a bulleted list only. "
        }
    }
}

/// Full prompt for `summary_type` over `transcript`
pub fn summary_prompt(summary_type: SummaryType, language: &str, transcript: &str) -> String {
    let mut prompt = template(summary_type).replace(TRANSCRIPT_PLACEHOLDER, transcript);
    prompt.push_str(&language_instruction(language));
    prompt
}

/// Text of a bullet or numbered line, `None` for anything else
fn bullet_text(line: &str) -> Option<&str> {
    let rest = if let Some(rest) = line
        .strip_prefix('-')
        .or_else(|| line.strip_prefix('•'))
        .or_else(|| line.strip_prefix('*'))
    {
        rest
    } else {
        let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        line[digits..]
            .strip_prefix('.')
            .or_else(|| line[digits..].strip_prefix(')'))?
    };
    let text = rest.trim().trim_matches('*').trim();
    (!text.is_empty()).then_some(text)
}

fn is_heading(line: &str) -> bool {
    let label = line.trim_end_matches(':').trim();
    !label.is_empty()
        && label.chars().any(|c| c.is_alphabetic())
        && label == label.to_uppercase()
        && bullet_text(line).is_none()
}

/// Bullets under the KEY POINTS / KEY TAKEAWAYS heading
///
/// Without such a heading every bullet in the text counts.
pub fn extract_key_points(content: &str) -> Vec<String> {
    let mut in_section = false;
    let mut found_section = false;
    let mut points = Vec::new();

    for line in content.lines().map(str::trim) {
        let upper = line.to_uppercase();
        if upper.starts_with("KEY POINT") || upper.starts_with("KEY TAKEAWAY") {
            in_section = true;
            found_section = true;
            continue;
        }
        if in_section && is_heading(line) {
            in_section = false;
            continue;
        }
        if in_section {
            if let Some(point) = bullet_text(line) {
                points.push(point.to_string());
            }
        }
    }

    if !found_section {
        points = content
            .lines()
            .filter_map(|line| bullet_text(line.trim()))
            .map(str::to_string)
            .collect();
    }
    points
}

pub struct SummaryService {
    db: SqlitePool,
    providers: Arc<ProviderCache>,
    transcripts: Arc<TranscriptService>,
    audio: Arc<dyn AudioLocator>,
    settings: Arc<dyn SettingsStore>,
    costs: CostRecorder,
}

impl SummaryService {
    pub fn new(
        db: SqlitePool,
        providers: Arc<ProviderCache>,
        transcripts: Arc<TranscriptService>,
        audio: Arc<dyn AudioLocator>,
        settings: Arc<dyn SettingsStore>,
        costs: CostRecorder,
    ) -> Self {
        Self {
            db,
            providers,
            transcripts,
            audio,
            settings,
            costs,
        }
    }

    pub async fn latest(&self, video: &Video) -> PipelineResult<Option<Summary>> {
        Ok(summaries::latest_summary(&self.db, video.id).await?)
    }

    /// Latest summary, or a short one generated from the transcript
    pub async fn get_or_generate(
        &self,
        video: &Video,
        language: Option<String>,
    ) -> PipelineResult<Summary> {
        if let Some(existing) = self.latest(video).await? {
            return Ok(existing);
        }
        self.generate(
            video,
            SummaryRequest {
                language,
                ..SummaryRequest::default()
            },
        )
        .await
    }

    /// Generate, persist and account for a new summary
    pub async fn generate(&self, video: &Video, request: SummaryRequest) -> PipelineResult<Summary> {
        let (text, provider) = if request.from_audio {
            let text = self.transcribe_audio(video).await?;
            let provider = match self.providers.llm(Operation::AudioAnalysis).await {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(error = %e, "Audio analysis provider unavailable, using the summary provider");
                    self.providers.llm(Operation::Summary).await?
                }
            };
            (text, provider)
        } else {
            let transcript = self.transcripts.get_or_create(video).await?;
            (transcript.content, self.providers.llm(Operation::Summary).await?)
        };

        if text.trim().is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no transcript text for {}",
                video.external_id
            )));
        }

        let language = self.language(request.language).await;
        self.summarize(video, &text, request.summary_type, &language, provider.as_ref())
            .await
    }

    async fn summarize(
        &self,
        video: &Video,
        text: &str,
        summary_type: SummaryType,
        language: &str,
        provider: &dyn LlmProvider,
    ) -> PipelineResult<Summary> {
        let prompt = summary_prompt(summary_type, language, text);
        let request = CompletionRequest {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            max_tokens: MAX_SUMMARY_TOKENS,
            ..CompletionRequest::new(prompt)
        };
        let response = provider.complete(&request).await?;
        if response.content.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty summary".to_string()).into());
        }

        let model = provider.model_info();
        let summary = Summary::new(
            video.id,
            format!("{}/{}", model.provider, model.name),
            summary_type,
            response.content.trim(),
            extract_key_points(&response.content),
        );
        summaries::save_summary(&self.db, &summary).await?;

        let input_tokens = if response.input_tokens > 0 {
            response.input_tokens
        } else {
            (request.prompt.len() / 4) as i64
        };
        self.costs
            .record(
                Some(video.id),
                operations::SUMMARIZATION,
                &model.provider,
                &model.name,
                input_tokens,
                response.output_tokens,
            )
            .await?;

        info!(
            video_id = %video.id,
            summary_type = summary_type.as_str(),
            key_points = summary.key_points.len(),
            "Stored summary"
        );
        Ok(summary)
    }

    /// One-off speech-to-text pass; the stored transcript is left alone
    async fn transcribe_audio(&self, video: &Video) -> PipelineResult<String> {
        let provider = match self.providers.transcription().await? {
            TranscriptionHandle::SpeechToText(provider) => provider,
            TranscriptionHandle::PlatformCaptions => {
                return Err(PipelineError::Config(
                    "audio summaries need a speech-to-text transcript provider".to_string(),
                ))
            }
        };
        if video.duration_seconds > MAX_TRANSCRIBE_SECONDS {
            return Err(ProviderError::AudioTooLong.into());
        }

        let audio_path = self.audio.locate(video).await?;
        let response = provider
            .transcribe(&TranscribeRequest {
                audio_path,
                language: None,
                task: TranscribeTask::Transcribe,
            })
            .await?;

        let info = provider.model_info();
        self.costs
            .record(
                Some(video.id),
                operations::TRANSCRIPTION,
                &info.provider,
                &info.name,
                (response.text.chars().count() / 4) as i64,
                0,
            )
            .await?;
        Ok(response.text)
    }

    /// Request value, else the `summary_language` setting, else "auto"
    async fn language(&self, requested: Option<String>) -> String {
        if let Some(language) = requested.filter(|l| !l.trim().is_empty()) {
            return language;
        }
        match self.settings.load().await {
            Ok(settings) if !settings.summary_language.trim().is_empty() => {
                settings.summary_language
            }
            Ok(_) => "auto".to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to read settings, summarizing in the transcript language");
                "auto".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_instruction() {
        assert_eq!(
            language_instruction("auto"),
            "Provide your response in the same language as the transcript."
        );
        assert_eq!(language_instruction(""), language_instruction("auto"));
        assert_eq!(language_instruction("TR"), "Provide your response in Turkish.");
        assert_eq!(language_instruction("Klingon"), "Provide your response in Klingon.");
    }

    #[test]
    fn test_prompt_embeds_transcript_and_language() {
        let prompt = summary_prompt(SummaryType::Detailed, "de", "the spoken words");
        assert!(prompt.contains("Transcript:\nthe spoken words\n"));
        assert!(prompt.contains("KEY TAKEAWAYS:"));
        assert!(prompt.ends_with("Provide your response in German."));
        assert!(!prompt.contains(TRANSCRIPT_PLACEHOLDER));

        let bullets = summary_prompt(SummaryType::BulletPoints, "auto", "x");
        assert!(!bullets.contains("SUMMARY:"));
    }

    #[test]
    fn test_key_points_come_from_their_section() {
        let content = "SUMMARY:\n- not a key point\nThe video explains things.\n\n\
                       KEY POINTS:\n- First idea\n• Second idea\n3. Third idea\n\n\
                       TOPICS:\n- Cooking";
        assert_eq!(
            extract_key_points(content),
            vec!["First idea", "Second idea", "Third idea"]
        );
    }

    #[test]
    fn test_key_points_fall_back_to_any_bullets() {
        let content = "Main points:\n* Alpha\n- **Beta**\n\nplain closing line";
        assert_eq!(extract_key_points(content), vec!["Alpha", "Beta"]);
        assert!(extract_key_points("just prose").is_empty());
    }
}
