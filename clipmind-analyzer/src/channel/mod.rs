//! Event channel over the durable log
//!
//! [`EventPublisher`] writes typed pipeline events with headers and partition
//! keys. [`ConsumerLoop`] drives one subscription: fetch, hand to a
//! [`MessageHandler`], commit only on success, retry failures in-process.

pub mod consumer;
pub mod publisher;

pub use consumer::{AttemptInfo, ConsumerLoop, ConsumerStats, MessageHandler, RetryPolicy};
pub use publisher::{decode, EventPublisher};
