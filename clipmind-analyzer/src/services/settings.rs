//! Runtime-editable provider settings
//!
//! Settings live as key/value rows in the `settings` table and are edited over
//! the API. Secrets are write-only: [`SettingsView`] exposes only whether each
//! key is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;

use crate::db::settings as settings_db;
use crate::error::{PipelineError, PipelineResult};

pub const TRANSCRIPT_PROVIDERS: [&str; 4] = ["youtube", "groq", "local", "huggingface"];
pub const LLM_PROVIDERS: [&str; 2] = ["gemini", "ollama"];

mod keys {
    pub const TRANSCRIPT_PROVIDER: &str = "transcript_provider";
    pub const SUMMARY_PROVIDER: &str = "summary_provider";
    pub const EMBEDDING_PROVIDER: &str = "embedding_provider";
    pub const AUDIO_ANALYSIS_PROVIDER: &str = "audio_analysis_provider";
    pub const OLLAMA_MODEL: &str = "ollama_model";
    pub const WHISPER_MODEL: &str = "whisper_model";
    pub const GEMINI_MODEL: &str = "gemini_model";
    pub const OLLAMA_URL: &str = "ollama_url";
    pub const LOCAL_WHISPER_URL: &str = "local_whisper_url";
    pub const SUMMARY_LANGUAGE: &str = "summary_language";
    pub const GROQ_API_KEY: &str = "groq_api_key";
    pub const HUGGINGFACE_API_KEY: &str = "huggingface_api_key";
    pub const GEMINI_API_KEY: &str = "gemini_api_key";
}

#[derive(Clone, PartialEq)]
pub struct Settings {
    pub transcript_provider: String,
    pub summary_provider: String,
    pub embedding_provider: String,
    pub audio_analysis_provider: String,
    pub ollama_model: String,
    pub whisper_model: String,
    /// Empty means the provider default
    pub gemini_model: String,
    pub ollama_url: String,
    pub local_whisper_url: String,
    pub summary_language: String,
    pub groq_api_key: String,
    pub huggingface_api_key: String,
    pub gemini_api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transcript_provider: "youtube".to_string(),
            summary_provider: "gemini".to_string(),
            embedding_provider: "gemini".to_string(),
            audio_analysis_provider: "gemini".to_string(),
            ollama_model: "llama3.2".to_string(),
            whisper_model: "base".to_string(),
            gemini_model: String::new(),
            ollama_url: "http://localhost:11434".to_string(),
            local_whisper_url: "http://localhost:8001".to_string(),
            summary_language: "auto".to_string(),
            groq_api_key: String::new(),
            huggingface_api_key: String::new(),
            gemini_api_key: String::new(),
        }
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("transcript_provider", &self.transcript_provider)
            .field("summary_provider", &self.summary_provider)
            .field("embedding_provider", &self.embedding_provider)
            .field("audio_analysis_provider", &self.audio_analysis_provider)
            .field("ollama_model", &self.ollama_model)
            .field("whisper_model", &self.whisper_model)
            .field("gemini_model", &self.gemini_model)
            .field("ollama_url", &self.ollama_url)
            .field("local_whisper_url", &self.local_whisper_url)
            .field("summary_language", &self.summary_language)
            .field("groq_api_key", &redact(&self.groq_api_key))
            .field("huggingface_api_key", &redact(&self.huggingface_api_key))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .finish()
    }
}

impl Settings {
    /// Build from stored rows; absent keys keep their defaults
    pub fn from_map(mut values: HashMap<String, String>) -> Self {
        let mut settings = Settings::default();
        for (key, field) in settings.fields_mut() {
            if let Some(value) = values.remove(key) {
                *field = value;
            }
        }
        settings
    }

    /// Every field as a (key, value) row
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut copy = self.clone();
        copy.fields_mut()
            .into_iter()
            .map(|(key, field)| (key, std::mem::take(field)))
            .collect()
    }

    fn fields_mut(&mut self) -> Vec<(&'static str, &mut String)> {
        vec![
            (keys::TRANSCRIPT_PROVIDER, &mut self.transcript_provider),
            (keys::SUMMARY_PROVIDER, &mut self.summary_provider),
            (keys::EMBEDDING_PROVIDER, &mut self.embedding_provider),
            (keys::AUDIO_ANALYSIS_PROVIDER, &mut self.audio_analysis_provider),
            (keys::OLLAMA_MODEL, &mut self.ollama_model),
            (keys::WHISPER_MODEL, &mut self.whisper_model),
            (keys::GEMINI_MODEL, &mut self.gemini_model),
            (keys::OLLAMA_URL, &mut self.ollama_url),
            (keys::LOCAL_WHISPER_URL, &mut self.local_whisper_url),
            (keys::SUMMARY_LANGUAGE, &mut self.summary_language),
            (keys::GROQ_API_KEY, &mut self.groq_api_key),
            (keys::HUGGINGFACE_API_KEY, &mut self.huggingface_api_key),
            (keys::GEMINI_API_KEY, &mut self.gemini_api_key),
        ]
    }

    pub fn view(&self) -> SettingsView {
        SettingsView {
            transcript_provider: self.transcript_provider.clone(),
            summary_provider: self.summary_provider.clone(),
            embedding_provider: self.embedding_provider.clone(),
            audio_analysis_provider: self.audio_analysis_provider.clone(),
            ollama_model: self.ollama_model.clone(),
            whisper_model: self.whisper_model.clone(),
            gemini_model: self.gemini_model.clone(),
            ollama_url: self.ollama_url.clone(),
            local_whisper_url: self.local_whisper_url.clone(),
            summary_language: self.summary_language.clone(),
            groq_api_key_configured: !self.groq_api_key.is_empty(),
            huggingface_api_key_configured: !self.huggingface_api_key.is_empty(),
            gemini_api_key_configured: !self.gemini_api_key.is_empty(),
        }
    }
}

/// Settings as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    pub transcript_provider: String,
    pub summary_provider: String,
    pub embedding_provider: String,
    pub audio_analysis_provider: String,
    pub ollama_model: String,
    pub whisper_model: String,
    pub gemini_model: String,
    pub ollama_url: String,
    pub local_whisper_url: String,
    pub summary_language: String,
    pub groq_api_key_configured: bool,
    pub huggingface_api_key_configured: bool,
    pub gemini_api_key_configured: bool,
}

/// Partial update; absent fields are left unchanged
///
/// Sending an empty string for a key clears it.
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub transcript_provider: Option<String>,
    pub summary_provider: Option<String>,
    pub embedding_provider: Option<String>,
    pub audio_analysis_provider: Option<String>,
    pub ollama_model: Option<String>,
    pub whisper_model: Option<String>,
    pub gemini_model: Option<String>,
    pub ollama_url: Option<String>,
    pub local_whisper_url: Option<String>,
    pub summary_language: Option<String>,
    pub groq_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

fn check_choice(field: &str, value: &str, allowed: &[&str]) -> PipelineResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!(
            "{} must be one of {}, got '{}'",
            field,
            allowed.join("|"),
            value
        )))
    }
}

impl SettingsPatch {
    /// Reject provider names outside the supported sets
    pub fn validate(&self) -> PipelineResult<()> {
        if let Some(v) = &self.transcript_provider {
            check_choice(keys::TRANSCRIPT_PROVIDER, v, &TRANSCRIPT_PROVIDERS)?;
        }
        for (field, value) in [
            (keys::SUMMARY_PROVIDER, &self.summary_provider),
            (keys::EMBEDDING_PROVIDER, &self.embedding_provider),
            (keys::AUDIO_ANALYSIS_PROVIDER, &self.audio_analysis_provider),
        ] {
            if let Some(v) = value {
                check_choice(field, v, &LLM_PROVIDERS)?;
            }
        }
        Ok(())
    }

    /// Merge into `settings`; keys are trimmed
    pub fn apply(self, settings: &mut Settings) {
        fn set(target: &mut String, value: Option<String>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        fn set_secret(target: &mut String, value: Option<String>) {
            if let Some(value) = value {
                *target = value.trim().to_string();
            }
        }

        set(&mut settings.transcript_provider, self.transcript_provider);
        set(&mut settings.summary_provider, self.summary_provider);
        set(&mut settings.embedding_provider, self.embedding_provider);
        set(&mut settings.audio_analysis_provider, self.audio_analysis_provider);
        set(&mut settings.ollama_model, self.ollama_model);
        set(&mut settings.whisper_model, self.whisper_model);
        set(&mut settings.gemini_model, self.gemini_model);
        set(&mut settings.ollama_url, self.ollama_url);
        set(&mut settings.local_whisper_url, self.local_whisper_url);
        set(&mut settings.summary_language, self.summary_language);
        set_secret(&mut settings.groq_api_key, self.groq_api_key);
        set_secret(&mut settings.huggingface_api_key, self.huggingface_api_key);
        set_secret(&mut settings.gemini_api_key, self.gemini_api_key);
    }

    /// Whether this patch switches transcription to the self-hosted service
    pub fn selects_local_whisper(&self) -> bool {
        self.transcript_provider.as_deref() == Some("local")
    }
}

/// Where settings are read from and written to
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> PipelineResult<Settings>;
    async fn save(&self, settings: &Settings) -> PipelineResult<()>;
}

#[derive(Clone)]
pub struct SqliteSettingsStore {
    db: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn load(&self) -> PipelineResult<Settings> {
        let values = settings_db::load_all_settings(&self.db).await?;
        Ok(Settings::from_map(values))
    }

    async fn save(&self, settings: &Settings) -> PipelineResult<()> {
        settings_db::set_settings(&self.db, &settings.to_pairs()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_common::db::init_memory_database;

    #[test]
    fn test_view_hides_secrets() {
        let mut settings = Settings::default();
        settings.gemini_api_key = "AIza-secret".to_string();

        let json = serde_json::to_string(&settings.view()).unwrap();
        assert!(!json.contains("AIza-secret"));
        assert!(json.contains("\"gemini_api_key_configured\":true"));
        assert!(json.contains("\"groq_api_key_configured\":false"));
        assert!(!format!("{:?}", settings).contains("AIza-secret"));
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let mut settings = Settings::default();
        settings.groq_api_key = "gsk-old".to_string();

        let patch: SettingsPatch = serde_json::from_str(
            r#"{"embedding_provider": "ollama", "gemini_api_key": "  k  ", "groq_api_key": ""}"#,
        )
        .unwrap();
        patch.validate().unwrap();
        patch.apply(&mut settings);

        assert_eq!(settings.embedding_provider, "ollama");
        assert_eq!(settings.summary_provider, "gemini");
        assert_eq!(settings.gemini_api_key, "k");
        assert!(settings.groq_api_key.is_empty());
    }

    #[test]
    fn test_patch_rejects_unknown_provider() {
        let patch = SettingsPatch {
            summary_provider: Some("openai".to_string()),
            ..Default::default()
        };
        assert!(matches!(patch.validate(), Err(PipelineError::InvalidInput(_))));

        let patch = SettingsPatch {
            transcript_provider: Some("local".to_string()),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
        assert!(patch.selects_local_whisper());
    }

    #[tokio::test]
    async fn test_store_round_trip_and_defaults() {
        let pool = init_memory_database().await.unwrap();
        let store = SqliteSettingsStore::new(pool);

        assert_eq!(store.load().await.unwrap(), Settings::default());

        let mut settings = Settings::default();
        settings.ollama_model = "mistral".to_string();
        settings.huggingface_api_key = "hf_x".to_string();
        store.save(&settings).await.unwrap();

        assert_eq!(store.load().await.unwrap(), settings);
    }
}
