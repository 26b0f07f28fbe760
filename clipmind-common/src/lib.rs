//! # ClipMind Common Library
//!
//! Shared code for the ClipMind services including:
//! - Error type shared by persistence and configuration code
//! - Configuration loading (TOML file + environment overrides)
//! - Pipeline event schema (envelopes, topics, consumer groups)
//! - Database models and schema bootstrap

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
