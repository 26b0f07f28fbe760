//! Provider selection and memoization
//!
//! Resolution is split in three:
//! 1. [`select`] maps (operation, settings, static config) to a [`ProviderSpec`] (pure data)
//! 2. a [`ProviderBuilder`] turns a spec into a live handle
//! 3. [`ProviderCache`] memoizes handles by [`ProviderKey`]
//!
//! The key carries a short SHA-256 fingerprint of the secret rather than the
//! secret, so a key rotation produces a new handle and the old key is never
//! held in the map's keys or logged.

use clipmind_common::config::{LlmConfig, WhisperConfig};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::settings::{Settings, SettingsStore};
use crate::error::{PipelineError, PipelineResult};
use crate::providers::{
    GeminiProvider, GroqWhisperProvider, HuggingFaceWhisperProvider, LlmProvider,
    LocalWhisperProvider, OllamaProvider, ProviderError, TranscriptionProvider,
};

/// What a handle is needed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Summary,
    Embedding,
    AudioAnalysis,
    Transcript,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Summary => "summary",
            Operation::Embedding => "embedding",
            Operation::AudioAnalysis => "audio_analysis",
            Operation::Transcript => "transcript",
        }
    }
}

/// Everything needed to construct one handle
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub operation: Operation,
    pub provider: String,
    /// Base URL for self-hosted backends, empty otherwise
    pub endpoint: String,
    pub model: String,
    pub secret: String,
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("operation", &self.operation)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("secret", &fingerprint(&self.secret))
            .finish()
    }
}

impl ProviderSpec {
    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            operation: self.operation,
            provider: self.provider.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            secret_fingerprint: fingerprint(&self.secret),
        }
    }
}

/// Outcome of selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Provider(ProviderSpec),
    /// Transcripts come from the platform; no speech-to-text handle
    PlatformCaptions,
}

/// Cache key; never contains the secret itself
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub operation: Operation,
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub secret_fingerprint: String,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.operation.as_str(),
            self.provider,
            self.endpoint,
            self.model,
            self.secret_fingerprint
        )
    }
}

/// First 8 hex chars of SHA-256(secret)
pub fn fingerprint(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Static fallbacks used when settings are blank or unreadable
#[derive(Clone)]
pub struct StaticProviderConfig {
    pub llm: LlmConfig,
    pub whisper: WhisperConfig,
}

fn prefer(setting: &str, fallback: &str) -> String {
    if setting.trim().is_empty() {
        fallback.trim().to_string()
    } else {
        setting.trim().to_string()
    }
}

fn prefer_opt(setting: &str, fallback: Option<&String>) -> String {
    prefer(setting, fallback.map(String::as_str).unwrap_or(""))
}

/// A settings field, or "" when settings are unavailable
fn field<'a>(settings: Option<&'a Settings>, get: impl FnOnce(&'a Settings) -> &'a String) -> &'a str {
    settings.map(get).map(String::as_str).unwrap_or("")
}

/// Pick provider, endpoint, model and secret for `operation`
///
/// With `settings == None` only static configuration is consulted.
pub fn select(
    operation: Operation,
    settings: Option<&Settings>,
    config: &StaticProviderConfig,
) -> Result<Selection, ProviderError> {
    let chosen = match operation {
        Operation::Summary => field(settings, |s| &s.summary_provider),
        Operation::Embedding => field(settings, |s| &s.embedding_provider),
        Operation::AudioAnalysis => field(settings, |s| &s.audio_analysis_provider),
        Operation::Transcript => return select_transcription(settings, &config.whisper),
    };
    let provider = prefer(chosen, &config.llm.provider);

    let spec = match provider.as_str() {
        "gemini" => ProviderSpec {
            operation,
            endpoint: String::new(),
            model: prefer_opt(field(settings, |s| &s.gemini_model), config.llm.gemini_model.as_ref()),
            secret: prefer_opt(field(settings, |s| &s.gemini_api_key), config.llm.gemini_key.as_ref()),
            provider,
        },
        "ollama" => ProviderSpec {
            operation,
            endpoint: prefer(field(settings, |s| &s.ollama_url), &config.llm.ollama_url),
            model: prefer(field(settings, |s| &s.ollama_model), &config.llm.ollama_model),
            secret: String::new(),
            provider,
        },
        _ => return Err(ProviderError::UnknownProvider(provider)),
    };
    Ok(Selection::Provider(spec))
}

fn select_transcription(
    settings: Option<&Settings>,
    config: &WhisperConfig,
) -> Result<Selection, ProviderError> {
    let provider = prefer(field(settings, |s| &s.transcript_provider), &config.provider);
    let model = prefer(field(settings, |s| &s.whisper_model), &config.local_model);

    let (endpoint, secret) = match provider.as_str() {
        "youtube" => return Ok(Selection::PlatformCaptions),
        "groq" => (
            String::new(),
            prefer_opt(field(settings, |s| &s.groq_api_key), config.groq_key.as_ref()),
        ),
        "huggingface" => (
            String::new(),
            prefer_opt(
                field(settings, |s| &s.huggingface_api_key),
                config.huggingface_key.as_ref(),
            ),
        ),
        "local" => (
            prefer(field(settings, |s| &s.local_whisper_url), &config.local_whisper_url),
            String::new(),
        ),
        _ => return Err(ProviderError::UnknownProvider(provider)),
    };

    Ok(Selection::Provider(ProviderSpec {
        operation: Operation::Transcript,
        provider,
        endpoint,
        model,
        secret,
    }))
}

/// Constructs live handles from specs
///
/// Construction is synchronous so it never runs across an await.
pub trait ProviderBuilder: Send + Sync {
    fn build_llm(&self, spec: &ProviderSpec) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    fn build_transcription(
        &self,
        spec: &ProviderSpec,
    ) -> Result<Arc<dyn TranscriptionProvider>, ProviderError>;
}

/// Builds the shipped HTTP clients
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProviderBuilder;

impl ProviderBuilder for HttpProviderBuilder {
    fn build_llm(&self, spec: &ProviderSpec) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        match spec.provider.as_str() {
            "gemini" => Ok(Arc::new(GeminiProvider::new(&spec.secret, Some(&spec.model))?)),
            "ollama" => Ok(Arc::new(OllamaProvider::new(&spec.endpoint, &spec.model)?)),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }

    fn build_transcription(
        &self,
        spec: &ProviderSpec,
    ) -> Result<Arc<dyn TranscriptionProvider>, ProviderError> {
        match spec.provider.as_str() {
            "groq" => Ok(Arc::new(GroqWhisperProvider::new(&spec.secret)?)),
            "huggingface" => Ok(Arc::new(HuggingFaceWhisperProvider::new(&spec.secret)?)),
            "local" => Ok(Arc::new(LocalWhisperProvider::new(&spec.endpoint)?)),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

/// How transcripts should be produced
#[derive(Clone)]
pub enum TranscriptionHandle {
    PlatformCaptions,
    SpeechToText(Arc<dyn TranscriptionProvider>),
}

type HandleMap<T> = HashMap<ProviderKey, Arc<T>>;

/// Both handle maps, guarded together so `clear` empties them in one step
#[derive(Default)]
struct Handles {
    llm: HandleMap<dyn LlmProvider>,
    transcription: HandleMap<dyn TranscriptionProvider>,
}

/// Memoized provider handles, keyed by configuration fingerprint
pub struct ProviderCache {
    settings: Arc<dyn SettingsStore>,
    config: StaticProviderConfig,
    builder: Arc<dyn ProviderBuilder>,
    handles: RwLock<Handles>,
}

impl ProviderCache {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        config: StaticProviderConfig,
        builder: Arc<dyn ProviderBuilder>,
    ) -> Self {
        Self {
            settings,
            config,
            builder,
            handles: RwLock::new(Handles::default()),
        }
    }

    /// Current settings, or `None` (logged) if the store cannot be read
    async fn current_settings(&self) -> Option<Settings> {
        match self.settings.load().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(error = %e, "Failed to read settings, using static configuration");
                None
            }
        }
    }

    async fn selection(&self, operation: Operation) -> PipelineResult<Selection> {
        let settings = self.current_settings().await;
        select(operation, settings.as_ref(), &self.config).map_err(|e| match e {
            ProviderError::UnknownProvider(name) => {
                PipelineError::Config(format!("unknown {} provider '{}'", operation.as_str(), name))
            }
            other => PipelineError::Provider(other),
        })
    }

    /// Completion/embedding handle for `operation`
    pub async fn llm(&self, operation: Operation) -> PipelineResult<Arc<dyn LlmProvider>> {
        let spec = match self.selection(operation).await? {
            Selection::Provider(spec) if operation != Operation::Transcript => spec,
            _ => {
                return Err(PipelineError::Config(format!(
                    "{} does not use a completion provider",
                    operation.as_str()
                )))
            }
        };

        self.get_or_build(
            spec.key(),
            |h| &h.llm,
            |h| &mut h.llm,
            || self.builder.build_llm(&spec),
        )
    }

    /// Transcript source: platform captions or a speech-to-text handle
    pub async fn transcription(&self) -> PipelineResult<TranscriptionHandle> {
        match self.selection(Operation::Transcript).await? {
            Selection::PlatformCaptions => Ok(TranscriptionHandle::PlatformCaptions),
            Selection::Provider(spec) => {
                let handle = self.get_or_build(
                    spec.key(),
                    |h| &h.transcription,
                    |h| &mut h.transcription,
                    || self.builder.build_transcription(&spec),
                )?;
                Ok(TranscriptionHandle::SpeechToText(handle))
            }
        }
    }

    /// Drop every cached handle (settings changed)
    ///
    /// Both maps are emptied under one write lock; no reader sees one cleared
    /// and the other populated.
    pub fn clear(&self) {
        *self.handles.write().unwrap_or_else(PoisonError::into_inner) = Handles::default();
        info!("Provider cache cleared");
    }

    /// Number of cached handles (both kinds)
    pub fn len(&self) -> usize {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        handles.llm.len() + handles.transcription.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Double-checked lookup: read lock for hits, build and insert under the write lock
    ///
    /// Construction is synchronous, so holding the lock never spans an await,
    /// and racing callers on a miss build exactly one handle.
    fn get_or_build<T: ?Sized>(
        &self,
        key: ProviderKey,
        map: impl Fn(&Handles) -> &HandleMap<T>,
        map_mut: impl FnOnce(&mut Handles) -> &mut HandleMap<T>,
        build: impl FnOnce() -> Result<Arc<T>, ProviderError>,
    ) -> PipelineResult<Arc<T>> {
        {
            let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = map(&*handles).get(&key) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        let entries = map_mut(&mut *handles);
        if let Some(handle) = entries.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let handle = build()?;
        debug!(key = %key, "Created provider handle");
        entries.insert(key, Arc::clone(&handle));
        Ok(handle)
    }
}
