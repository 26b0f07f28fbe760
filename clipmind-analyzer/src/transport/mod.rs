//! Durable log abstraction
//!
//! Kafka-like semantics: partitioned topics, records keyed for partition
//! affinity, consumer groups with manually committed offsets. A record that
//! is fetched but never committed is delivered again to the next subscription
//! of the same group (at-least-once).

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryLog;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Event serialization failed: {0}")]
    Serialization(String),
}

impl TransportError {
    pub fn sub_code(&self) -> &'static str {
        match self {
            TransportError::Unavailable(_) => "TRANSPORT_UNAVAILABLE",
            TransportError::UnknownTopic(_) => "UNKNOWN_TOPIC",
            TransportError::Serialization(_) => "SERIALIZATION_FAILED",
        }
    }
}

/// A record to append to a topic
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    /// Partition key
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// A record handed to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl Delivery {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Producer/consumer access to the log
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append a record; returns only once the write is acknowledged
    async fn publish(&self, record: OutboundRecord) -> Result<(), TransportError>;

    /// Join `group` on `topic`, resuming from the group's committed offsets
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Cheap reachability check
    async fn is_available(&self) -> bool;
}

/// One group member's view of a topic
///
/// `Sync` so a consume loop owning one can run on a spawned task.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Next record, or `None` if nothing arrived within `max_wait`
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Delivery>, TransportError>;

    /// Mark `delivery` (and everything before it in its partition) as processed
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError>;
}
