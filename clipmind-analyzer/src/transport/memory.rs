//! In-process partitioned log
//!
//! Implements the [`Transport`] contract without an external broker:
//! - each topic has a fixed number of partitions, chosen by key hash
//! - each consumer group commits offsets per partition
//! - a new subscription resumes at the committed offsets, so anything fetched
//!   but never committed is delivered again
//! - [`MemoryLog::set_available`] simulates a broker outage for publish and fetch
//!
//! Each group is expected to hold one subscription per topic at a time
//! (there is no partition rebalancing between concurrent members).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{Delivery, OutboundRecord, Subscription, Transport, TransportError};
use clipmind_common::events::topics;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct LogState {
    /// topic -> partitions -> records
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic) -> next offset to consume per partition
    committed: HashMap<(String, String), Vec<u64>>,
}

struct Inner {
    state: Mutex<LogState>,
    appended: Notify,
    available: AtomicBool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A poisoned lock only means a panicking test thread; the data is still consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable("log is offline".to_string()))
        }
    }
}

/// Cloneable handle to a shared in-memory log
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    /// Log with the pipeline topics created at their default partition counts
    pub fn new() -> Self {
        let log = Self::empty();
        for topic in topics::ALL {
            log.create_topic(topic, topics::partitions(topic));
        }
        log
    }

    /// Log with no topics
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState::default()),
                appended: Notify::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Create a topic (no-op if it exists)
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut state = self.inner.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// Toggle simulated broker availability
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    /// Every record on `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Delivery> {
        let state = self.inner.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, records)| {
                records.iter().enumerate().map(move |(offset, r)| Delivery {
                    topic: topic.to_string(),
                    partition: p as u32,
                    offset: offset as u64,
                    key: r.key.clone(),
                    payload: r.payload.clone(),
                    headers: r.headers.clone(),
                })
            })
            .collect()
    }

    /// Committed position of `group` on one partition (0 if never committed)
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        let state = self.inner.lock();
        state
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .and_then(|offsets| offsets.get(partition as usize).copied())
            .unwrap_or(0)
    }

    /// Partition a key maps to on `topic`
    pub fn partition_for(&self, topic: &str, key: &str) -> Option<u32> {
        let state = self.inner.lock();
        state
            .topics
            .get(topic)
            .map(|p| partition_for_key(key, p.len() as u32))
    }
}

/// FNV-1a; stable across runs so a key always lands on the same partition
fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x01000193);
    }
    hash % partitions.max(1)
}

#[async_trait]
impl Transport for MemoryLog {
    async fn publish(&self, record: OutboundRecord) -> Result<(), TransportError> {
        self.inner.check_available()?;

        let (partition, offset) = {
            let mut state = self.inner.lock();
            let partitions = state
                .topics
                .get_mut(&record.topic)
                .ok_or_else(|| TransportError::UnknownTopic(record.topic.clone()))?;

            let partition = partition_for_key(&record.key, partitions.len() as u32);
            let log = &mut partitions[partition as usize];
            log.push(StoredRecord {
                key: record.key,
                payload: record.payload,
                headers: record.headers,
            });
            (partition, log.len() as u64 - 1)
        };

        debug!(topic = %record.topic, partition, offset, "Record appended");
        self.inner.appended.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.inner.check_available()?;

        let positions = {
            let mut state = self.inner.lock();
            let partition_count = state
                .topics
                .get(topic)
                .map(|p| p.len())
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;

            state
                .committed
                .entry((group.to_string(), topic.to_string()))
                .or_insert_with(|| vec![0; partition_count])
                .clone()
        };

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            positions,
            next_partition: 0,
        }))
    }

    async fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    /// Next offset to hand out per partition
    positions: Vec<u64>,
    /// Round-robin start so one busy partition cannot starve the others
    next_partition: usize,
}

impl MemorySubscription {
    fn try_take(&mut self) -> Result<Option<Delivery>, TransportError> {
        self.inner.check_available()?;

        let state = self.inner.lock();
        let partitions = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| TransportError::UnknownTopic(self.topic.clone()))?;

        let count = partitions.len();
        for i in 0..count {
            let p = (self.next_partition + i) % count;
            let offset = self.positions[p];
            if let Some(record) = partitions[p].get(offset as usize) {
                self.positions[p] = offset + 1;
                self.next_partition = (p + 1) % count;
                return Ok(Some(Delivery {
                    topic: self.topic.clone(),
                    partition: p as u32,
                    offset,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    headers: record.headers.clone(),
                }));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + max_wait;
        let inner = Arc::clone(&self.inner);

        loop {
            // Registered before checking so an append between check and wait is not missed
            let appended = inner.appended.notified();

            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.inner.check_available()?;

        let mut state = self.inner.lock();
        let partition_count = self.positions.len();
        let offsets = state
            .committed
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert_with(|| vec![0; partition_count]);

        if let Some(slot) = offsets.get_mut(delivery.partition as usize) {
            *slot = (*slot).max(delivery.offset + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, key: &str, body: &str) -> OutboundRecord {
        OutboundRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: body.as_bytes().to_vec(),
            headers: vec![("event-type".to_string(), topic.to_string())],
        }
    }

    #[tokio::test]
    async fn test_same_key_keeps_publish_order() {
        let log = MemoryLog::empty();
        log.create_topic("t", 4);

        for i in 0..5 {
            log.publish(record("t", "video-1", &i.to_string())).await.unwrap();
        }

        let mut sub = log.subscribe("t", "g").await.unwrap();
        let mut seen = Vec::new();
        while let Some(d) = sub.fetch(Duration::from_millis(10)).await.unwrap() {
            seen.push(String::from_utf8(d.payload.clone()).unwrap());
            sub.commit(&d).await.unwrap();
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_uncommitted_record_is_redelivered_to_next_subscription() {
        let log = MemoryLog::empty();
        log.create_topic("t", 1);
        log.publish(record("t", "k", "first")).await.unwrap();
        log.publish(record("t", "k", "second")).await.unwrap();

        let mut sub = log.subscribe("t", "g").await.unwrap();
        let first = sub.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        sub.commit(&first).await.unwrap();
        let second = sub.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.payload, b"second");
        drop(sub); // never committed

        let mut restarted = log.subscribe("t", "g").await.unwrap();
        let again = restarted.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.payload, b"second");
        assert_eq!(log.committed_offset("g", "t", 0), 1);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let log = MemoryLog::empty();
        log.create_topic("t", 1);
        log.publish(record("t", "k", "x")).await.unwrap();

        let mut a = log.subscribe("t", "group-a").await.unwrap();
        let d = a.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        a.commit(&d).await.unwrap();

        let mut b = log.subscribe("t", "group-b").await.unwrap();
        assert!(b.fetch(Duration::from_millis(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let log = MemoryLog::empty();
        log.create_topic("t", 2);
        let mut sub = log.subscribe("t", "g").await.unwrap();

        let producer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish(record("t", "k", "late")).await.unwrap();
        });

        let delivery = sub.fetch(Duration::from_secs(5)).await.unwrap();
        assert_eq!(delivery.unwrap().payload, b"late");
    }

    #[tokio::test]
    async fn test_fetch_times_out_empty() {
        let log = MemoryLog::new();
        let mut sub = log
            .subscribe(topics::TRANSCRIPT_REQUESTED, "g")
            .await
            .unwrap();
        assert!(sub.fetch(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_log_rejects_publish_and_fetch() {
        let log = MemoryLog::empty();
        log.create_topic("t", 1);
        let mut sub = log.subscribe("t", "g").await.unwrap();

        log.set_available(false);
        assert!(!log.is_available().await);
        assert!(matches!(
            log.publish(record("t", "k", "x")).await,
            Err(TransportError::Unavailable(_))
        ));
        assert!(sub.fetch(Duration::from_millis(10)).await.is_err());

        log.set_available(true);
        log.publish(record("t", "k", "x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let log = MemoryLog::empty();
        assert!(matches!(
            log.publish(record("missing", "k", "x")).await,
            Err(TransportError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_default_partition_counts() {
        let log = MemoryLog::new();
        let p = log.partition_for(topics::TRANSCRIPT_REQUESTED, "abc").unwrap();
        assert!(p < 5);
        assert_eq!(partition_for_key("abc", 5), p);
    }
}
