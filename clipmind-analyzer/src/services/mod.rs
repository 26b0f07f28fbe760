//! Engines and collaborators used by pipeline stages and the API

pub mod audio;
pub mod cost;
pub mod embedding;
pub mod pricing;
pub mod provider_cache;
pub mod settings;
pub mod similarity;
pub mod summary;
pub mod transcript;
pub mod youtube;

pub use audio::{AudioLocator, MediaDirectoryLocator};
pub use cost::{CostPeriod, CostRecorder, CostSummary};
pub use embedding::{EmbeddingEngine, EmbeddingSet};
pub use provider_cache::{
    HttpProviderBuilder, Operation, ProviderBuilder, ProviderCache, StaticProviderConfig,
    TranscriptionHandle,
};
pub use settings::{Settings, SettingsPatch, SettingsStore, SqliteSettingsStore};
pub use similarity::{RankedVideo, SimilarityEngine, SimilarityOutcome};
pub use summary::{SummaryRequest, SummaryService};
pub use transcript::TranscriptService;
pub use youtube::{CaptionSource, CaptionTrack, RelatedVideo, RelatedVideosSource, YouTubeClient};
