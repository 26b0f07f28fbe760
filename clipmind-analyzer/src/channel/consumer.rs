//! Fetch / handle / commit loop with bounded in-process retry

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::transport::{Delivery, Subscription};

/// Retry and pacing knobs for a consume loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Handler attempts per delivery, including the first
    pub max_attempts: u32,
    /// Sleep `attempt × backoff_step` between attempts
    pub backoff_step: Duration,
    /// Bounded wait for one fetch
    pub fetch_wait: Duration,
    /// Pause after a failed fetch
    pub fetch_error_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
            fetch_wait: Duration::from_secs(5),
            fetch_error_pause: Duration::from_secs(1),
        }
    }
}

/// Which attempt a handler invocation is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptInfo {
    /// 1-based
    pub number: u32,
    pub is_last: bool,
}

impl AttemptInfo {
    /// A single, final attempt (direct execution with no redelivery)
    pub fn only() -> Self {
        Self { number: 1, is_last: true }
    }
}

/// Processes one delivery; `Ok` means the record may be committed
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery, attempt: AttemptInfo) -> Result<(), PipelineError>;
}

/// Counters returned when a loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub committed: u64,
    /// Deliveries abandoned after exhausting attempts
    pub exhausted: u64,
    pub fetch_errors: u64,
}

pub struct ConsumerLoop {
    name: String,
    subscription: Box<dyn Subscription>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

enum Attempts {
    Succeeded,
    Exhausted,
    Cancelled,
}

impl ConsumerLoop {
    pub fn new(
        name: impl Into<String>,
        subscription: Box<dyn Subscription>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            policy,
            cancel,
        }
    }

    /// Run until the cancellation token fires
    pub async fn run<H: MessageHandler + ?Sized>(mut self, handler: &H) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        info!(consumer = %self.name, "Consumer loop started");

        while !self.cancel.is_cancelled() {
            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => break,
                fetched = self.subscription.fetch(self.policy.fetch_wait) => fetched,
            };

            let delivery = match fetched {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    stats.fetch_errors += 1;
                    warn!(consumer = %self.name, error = %e, "Fetch failed");
                    self.pause(self.policy.fetch_error_pause).await;
                    continue;
                }
            };

            match self.process(handler, &delivery).await {
                Attempts::Succeeded => match self.subscription.commit(&delivery).await {
                    Ok(()) => stats.committed += 1,
                    Err(e) => warn!(
                        consumer = %self.name,
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Commit failed; record will be redelivered"
                    ),
                },
                Attempts::Exhausted => {
                    stats.exhausted += 1;
                    error!(
                        consumer = %self.name,
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        key = %delivery.key,
                        "Giving up on record after {} attempts",
                        self.policy.max_attempts
                    );
                }
                Attempts::Cancelled => break,
            }
        }

        info!(
            consumer = %self.name,
            committed = stats.committed,
            exhausted = stats.exhausted,
            "Consumer loop stopped"
        );
        stats
    }

    async fn process<H: MessageHandler + ?Sized>(&self, handler: &H, delivery: &Delivery) -> Attempts {
        let max_attempts = self.policy.max_attempts.max(1);

        for number in 1..=max_attempts {
            let attempt = AttemptInfo {
                number,
                is_last: number == max_attempts,
            };

            // The handler call itself is never interrupted
            match handler.handle(delivery, attempt).await {
                Ok(()) => {
                    debug!(consumer = %self.name, offset = delivery.offset, attempt = number, "Handled");
                    return Attempts::Succeeded;
                }
                Err(e) => {
                    warn!(
                        consumer = %self.name,
                        key = %delivery.key,
                        attempt = number,
                        error = %e,
                        "Handler failed"
                    );
                    if attempt.is_last {
                        return Attempts::Exhausted;
                    }
                }
            }

            if !self.pause(self.policy.backoff_step * number).await {
                return Attempts::Cancelled;
            }
        }

        Attempts::Exhausted
    }

    /// Sleep unless cancelled first; false if cancelled
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryLog, OutboundRecord, Transport};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const TOPIC: &str = "video.embedding.requested";
    const GROUP: &str = "test-embedding";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1),
            fetch_wait: Duration::from_millis(20),
            fetch_error_pause: Duration::from_millis(1),
        }
    }

    /// Fails the first `failures` calls, then succeeds
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _delivery: &Delivery, _attempt: AttemptInfo) -> Result<(), PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(PipelineError::Persistence("database is locked".into()));
            }
            self.cancel.cancel();
            Ok(())
        }
    }

    async fn publish_one(log: &MemoryLog) {
        log.publish(OutboundRecord {
            topic: TOPIC.to_string(),
            key: "video-1".to_string(),
            payload: b"{}".to_vec(),
            headers: Vec::new(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_commits_only_after_successful_attempt() {
        let log = MemoryLog::new();
        publish_one(&log).await;
        let partition = log.partition_for(TOPIC, "video-1").unwrap();

        let cancel = CancellationToken::new();
        let handler = FlakyHandler {
            failures: 2,
            calls: AtomicU32::new(0),
            cancel: cancel.clone(),
        };
        let subscription = log.subscribe(TOPIC, GROUP).await.unwrap();
        let stats = ConsumerLoop::new("test", subscription, fast_policy(), cancel)
            .run(&handler)
            .await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.committed, 1);
        assert_eq!(log.committed_offset(GROUP, TOPIC, partition), 1);
    }

    #[tokio::test]
    async fn test_exhausted_record_left_uncommitted() {
        let log = MemoryLog::new();
        publish_one(&log).await;
        let partition = log.partition_for(TOPIC, "video-1").unwrap();

        let cancel = CancellationToken::new();
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        });
        let subscription = log.subscribe(TOPIC, GROUP).await.unwrap();
        let consumer = ConsumerLoop::new("test", subscription, fast_policy(), cancel.clone());

        let task_handler = Arc::clone(&handler);
        let task = tokio::spawn(async move { consumer.run(task_handler.as_ref()).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let stats = task.await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.committed, 0);
        assert_eq!(log.committed_offset(GROUP, TOPIC, partition), 0);
    }

    #[tokio::test]
    async fn test_loop_can_run_on_a_spawned_task() {
        fn assert_send<T: Send>(_: &T) {}

        let log = MemoryLog::new();
        let cancel = CancellationToken::new();
        let handler = FlakyHandler {
            failures: 0,
            calls: AtomicU32::new(0),
            cancel: cancel.clone(),
        };
        let subscription = log.subscribe(TOPIC, GROUP).await.unwrap();
        let consumer = ConsumerLoop::new("test", subscription, fast_policy(), cancel.clone());

        let running = consumer.run(&handler);
        assert_send(&running);

        cancel.cancel();
        let stats = running.await;
        assert_eq!(stats, ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_fetch_errors_pause_and_continue() {
        let log = MemoryLog::new();
        let subscription = log.subscribe(TOPIC, GROUP).await.unwrap();
        log.set_available(false);

        let cancel = CancellationToken::new();
        let handler = FlakyHandler {
            failures: 0,
            calls: AtomicU32::new(0),
            cancel: cancel.clone(),
        };
        let consumer = ConsumerLoop::new("test", subscription, fast_policy(), cancel.clone());

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stopper.cancel();
        });

        let stats = consumer.run(&handler).await;
        assert!(stats.fetch_errors > 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
