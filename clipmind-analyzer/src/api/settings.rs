//! Runtime provider settings
//!
//! GET returns settings with API keys reduced to `*_configured` flags.
//! PATCH merges the supplied fields, persists them and clears the provider
//! cache so the next stage builds handles from the new values.

use axum::{extract::State, routing::get, Json, Router};
use std::time::Duration;
use tracing::{info, warn};

use crate::providers::LocalWhisperProvider;
use crate::services::settings::{SettingsPatch, SettingsView};
use crate::{ApiError, ApiResult, AppState};

/// Bound on the local Whisper availability check
const LOCAL_WHISPER_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<SettingsView>> {
    let settings = state.settings.load().await?;
    Ok(Json(settings.view()))
}

/// PATCH /api/v1/settings
///
/// **Errors:**
/// - 400: unknown field, unknown provider, or local Whisper selected but unreachable
/// - 500: settings could not be stored
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<SettingsView>> {
    let patch: SettingsPatch = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid settings: {}", e)))?;
    patch.validate()?;

    let check_local = patch.selects_local_whisper();
    let mut settings = state.settings.load().await?;
    patch.apply(&mut settings);

    if check_local {
        let url = settings.local_whisper_url.clone();
        let available = match LocalWhisperProvider::new(&url) {
            Ok(client) => client.is_healthy(LOCAL_WHISPER_CHECK_TIMEOUT).await,
            Err(_) => false,
        };
        if !available {
            warn!(url = %url, "Local Whisper service unavailable, settings not saved");
            return Err(ApiError::BadRequest(format!(
                "Local Whisper service is not available at {}",
                url
            )));
        }
    }

    state.settings.save(&settings).await?;
    state.providers.clear();

    info!(
        transcript_provider = %settings.transcript_provider,
        embedding_provider = %settings.embedding_provider,
        "Settings updated"
    );
    Ok(Json(settings.view()))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/api/v1/settings", get(get_settings).patch(update_settings))
}
