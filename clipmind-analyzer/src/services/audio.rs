//! Audio file location for speech-to-text

use async_trait::async_trait;
use clipmind_common::db::Video;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Extensions tried in order
pub const AUDIO_EXTENSIONS: [&str; 8] = ["mp3", "m4a", "wav", "webm", "ogg", "opus", "flac", "mp4"];

#[async_trait]
pub trait AudioLocator: Send + Sync {
    /// Path of a local audio file for `video`
    async fn locate(&self, video: &Video) -> PipelineResult<PathBuf>;
}

/// Looks for `<media_dir>/<external_id>.<ext>`
pub struct MediaDirectoryLocator {
    dir: PathBuf,
}

impl MediaDirectoryLocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AudioLocator for MediaDirectoryLocator {
    async fn locate(&self, video: &Video) -> PipelineResult<PathBuf> {
        // External ids are platform ids; refuse anything that could escape the directory
        if video.external_id.is_empty()
            || video
                .external_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(PipelineError::InvalidInput(format!(
                "external id '{}' cannot name an audio file",
                video.external_id
            )));
        }

        for ext in AUDIO_EXTENSIONS {
            let candidate = self.dir.join(format!("{}.{}", video.external_id, ext));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(video_id = %video.id, path = %candidate.display(), "Located audio");
                return Ok(candidate);
            }
        }

        Err(PipelineError::NotFound(format!(
            "no audio for {} in {}",
            video.external_id,
            self.dir.display()
        )))
    }
}
