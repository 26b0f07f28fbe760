//! HTTP API handlers for clipmind-analyzer

pub mod costs;
pub mod health;
pub mod settings;
pub mod videos;

pub use costs::cost_routes;
pub use health::health_routes;
pub use settings::settings_routes;
pub use videos::video_routes;
