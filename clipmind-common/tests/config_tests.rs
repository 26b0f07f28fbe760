//! Configuration loading tests
//!
//! Tests that set or clear CLIPMIND_* variables are marked #[serial] so they do
//! not race each other on the process environment.

use clipmind_common::config::{
    load_config, read_toml_config, resolve_config_path, write_toml_config, AppConfig,
    CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

const OVERRIDE_VARS: [&str; 6] = [
    CONFIG_ENV_VAR,
    "CLIPMIND_PORT",
    "CLIPMIND_LLM_PROVIDER",
    "CLIPMIND_GEMINI_API_KEY",
    "CLIPMIND_TRANSPORT_ENABLED",
    "CLIPMIND_ROOT_FOLDER",
];

fn clear_env() {
    for var in OVERRIDE_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_cli_path_wins_over_env_var() {
    clear_env();
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let cli = PathBuf::from("/tmp/from-cli.toml");
    let resolved = resolve_config_path(Some(&cli));
    assert_eq!(resolved, Some(cli));

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    clear_env();
}

#[test]
#[serial]
fn test_file_values_then_env_overrides() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        port = 6100

        [llm]
        provider = "ollama"
        ollama_model = "mistral"
        "#,
    )
    .unwrap();

    // Given: a file setting port 6100 and an env override for the provider
    env::set_var("CLIPMIND_LLM_PROVIDER", "gemini");
    env::set_var("CLIPMIND_GEMINI_API_KEY", "key-from-env");

    // When: loading
    let config = load_config(Some(&path)).unwrap();

    // Then: file values survive unless overridden
    assert_eq!(config.server.port, 6100);
    assert_eq!(config.llm.ollama_model, "mistral");
    assert_eq!(config.llm.provider, "gemini");
    assert_eq!(config.llm.gemini_key.as_deref(), Some("key-from-env"));

    clear_env();
}

#[test]
#[serial]
fn test_blank_env_values_are_ignored() {
    clear_env();
    env::set_var("CLIPMIND_PORT", "   ");
    env::set_var("CLIPMIND_TRANSPORT_ENABLED", "not-a-bool");

    let mut config = AppConfig::default();
    config.apply_env_overrides();

    assert_eq!(config.server.port, AppConfig::default().server.port);
    assert!(config.transport.enabled);

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let result = load_config(Some(&PathBuf::from("/nonexistent/clipmind.toml")));
    assert!(result.is_err());
}

#[test]
fn test_write_then_read_preserves_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.server.port = 7001;
    config.whisper.provider = "local".to_string();
    config.media_dir = Some(dir.path().join("media"));

    write_toml_config(&config, &path).unwrap();
    let loaded = read_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
#[serial]
fn test_paths_derive_from_root_folder() {
    clear_env();
    let mut config = AppConfig::default();
    config.root_folder = Some(PathBuf::from("/data/clipmind"));

    assert_eq!(config.database_path(), PathBuf::from("/data/clipmind/clipmind.db"));
    assert_eq!(config.media_dir(), PathBuf::from("/data/clipmind/media"));
}
