//! Database access for the analyzer
//!
//! Free functions over `SqlitePool`, one module per table. Every write that a
//! redelivered event can repeat is an upsert on the row's natural key.

pub mod embeddings;
pub mod settings;
pub mod similarities;
pub mod summaries;
pub mod transcripts;
pub mod usage;
pub mod videos;
