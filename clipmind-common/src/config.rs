//! Configuration loading and root folder resolution
//!
//! Static configuration comes from a TOML file, resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CLIPMIND_CONFIG` environment variable
//! 3. User config dir (`~/.config/clipmind/config.toml`), then `/etc/clipmind/config.toml`
//! 4. Compiled defaults
//!
//! Individual values can then be overridden by `CLIPMIND_*` environment variables.
//! Runtime-editable provider settings live in the database, not here; the values
//! below are the static fallback used when the settings store has nothing better.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CLIPMIND_CONFIG";

/// Top-level static configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Folder holding the database (and default media folder)
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
    pub llm: LlmConfig,
    pub whisper: WhisperConfig,
    pub youtube: YouTubeConfig,
    /// Folder containing downloaded audio, one file per external id
    pub media_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "clipmind_analyzer=info,clipmind_common=info,tower_http=info".to_string(),
        }
    }
}

/// Event transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// When false, every pipeline run uses the in-process fallback path
    pub enabled: bool,
    /// Consumer group prefix; stage workers append `-transcript`, `-embedding`, `-similarity`
    pub consumer_group: String,
    /// Attempts for `publish_with_retry`
    pub publish_retries: u32,
    /// Bounded wait for a single fetch, in milliseconds
    pub fetch_wait_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consumer_group: "clipmind".to_string(),
            publish_retries: 3,
            fetch_wait_ms: 5000,
        }
    }
}

/// Static LLM defaults
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini" | "ollama"
    pub provider: String,
    pub gemini_key: Option<String>,
    pub gemini_model: Option<String>,
    pub ollama_url: String,
    pub ollama_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            gemini_key: None,
            gemini_model: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("gemini_key", &redacted(&self.gemini_key))
            .field("gemini_model", &self.gemini_model)
            .field("ollama_url", &self.ollama_url)
            .field("ollama_model", &self.ollama_model)
            .finish()
    }
}

/// Static speech-to-text defaults
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WhisperConfig {
    /// "groq" | "local" | "huggingface"
    pub provider: String,
    pub groq_key: Option<String>,
    pub huggingface_key: Option<String>,
    pub local_whisper_url: String,
    pub local_model: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            groq_key: None,
            huggingface_key: None,
            local_whisper_url: "http://localhost:8001".to_string(),
            local_model: "base".to_string(),
        }
    }
}

impl fmt::Debug for WhisperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhisperConfig")
            .field("provider", &self.provider)
            .field("groq_key", &redacted(&self.groq_key))
            .field("huggingface_key", &redacted(&self.huggingface_key))
            .field("local_whisper_url", &self.local_whisper_url)
            .field("local_model", &self.local_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct YouTubeConfig {
    pub api_key: Option<String>,
}

impl fmt::Debug for YouTubeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeConfig")
            .field("api_key", &redacted(&self.api_key))
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

impl AppConfig {
    /// Root folder, falling back to the OS default
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(get_default_root_folder)
    }

    /// SQLite database location inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder().join("clipmind.db")
    }

    /// Media folder, defaulting to `<root>/media`
    pub fn media_dir(&self) -> PathBuf {
        self.media_dir
            .clone()
            .unwrap_or_else(|| self.root_folder().join("media"))
    }

    /// Apply `CLIPMIND_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("CLIPMIND_ROOT_FOLDER") {
            self.root_folder = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("CLIPMIND_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_parse::<u16>("CLIPMIND_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_parse::<bool>("CLIPMIND_TRANSPORT_ENABLED") {
            self.transport.enabled = v;
        }
        if let Some(v) = env_string("CLIPMIND_CONSUMER_GROUP") {
            self.transport.consumer_group = v;
        }
        if let Some(v) = env_string("CLIPMIND_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = env_string("CLIPMIND_GEMINI_API_KEY") {
            self.llm.gemini_key = Some(v);
        }
        if let Some(v) = env_string("CLIPMIND_OLLAMA_URL") {
            self.llm.ollama_url = v;
        }
        if let Some(v) = env_string("CLIPMIND_OLLAMA_MODEL") {
            self.llm.ollama_model = v;
        }
        if let Some(v) = env_string("CLIPMIND_WHISPER_PROVIDER") {
            self.whisper.provider = v;
        }
        if let Some(v) = env_string("CLIPMIND_GROQ_API_KEY") {
            self.whisper.groq_key = Some(v);
        }
        if let Some(v) = env_string("CLIPMIND_HUGGINGFACE_API_KEY") {
            self.whisper.huggingface_key = Some(v);
        }
        if let Some(v) = env_string("CLIPMIND_LOCAL_WHISPER_URL") {
            self.whisper.local_whisper_url = v;
        }
        if let Some(v) = env_string("CLIPMIND_YOUTUBE_API_KEY") {
            self.youtube.api_key = Some(v);
        }
        if let Some(v) = env_string("CLIPMIND_MEDIA_DIR") {
            self.media_dir = Some(PathBuf::from(v));
        }
    }

    /// Reject configurations that cannot possibly work
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }
        if self.transport.consumer_group.trim().is_empty() {
            return Err(Error::Config(
                "transport.consumer_group must not be empty".to_string(),
            ));
        }
        if self.transport.publish_retries == 0 {
            return Err(Error::Config(
                "transport.publish_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration following the priority order in the module docs
pub fn load_config(cli_path: Option<&Path>) -> Result<AppConfig> {
    let path = resolve_config_path(cli_path);

    let mut config = match &path {
        Some(p) => {
            info!("Loading configuration from {}", p.display());
            read_toml_config(p)?
        }
        None => {
            info!("No configuration file found, using defaults");
            AppConfig::default()
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Find the config file to read, if any
///
/// An explicit CLI or environment path is returned even if it does not exist, so
/// the subsequent read reports the missing file instead of silently using defaults.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Some(path) = env_string(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("clipmind").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/clipmind/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    debug!("Wrote configuration to {}", path.display());
    Ok(())
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("clipmind"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/clipmind"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("clipmind"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/clipmind"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("clipmind"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\clipmind"))
    } else {
        PathBuf::from("./clipmind_data")
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}
