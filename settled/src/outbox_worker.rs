//! Outbox worker: polls the outbox, dispatches events to registered
//! processors, and applies retry/dead-letter policy.
//!
//! The loop is single-threaded per instance; multiple instances coordinate
//! through the claim lease. Delivery is at-least-once, so every processor
//! must be duplicate-safe.

use crate::config::WorkerConfig;
use crate::error::AppError;
use async_trait::async_trait;
use settle_store::{OutboxEntry, OutboxQueue, OutboxStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handles one event type pulled off the outbox.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, entry: &OutboxEntry) -> Result<(), AppError>;
}

/// Scheduler-driven outbox dispatcher.
pub struct OutboxWorker {
    queue: Arc<dyn OutboxQueue>,
    processors: HashMap<String, Arc<dyn EventProcessor>>,
    config: WorkerConfig,
    worker_id: String,
}

impl OutboxWorker {
    pub fn new(queue: Arc<dyn OutboxQueue>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processors: HashMap::new(),
            config,
            worker_id: format!("worker-{}", Uuid::new_v4().simple()),
        }
    }

    /// Register the processor for an event type. Last registration wins.
    pub fn register(&mut self, event_type: &str, processor: Arc<dyn EventProcessor>) {
        self.processors.insert(event_type.to_string(), processor);
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the polling loop until shutdown is signaled.
    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox worker started"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.tick().await; // First tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker_id = %self.worker_id, "Outbox worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(count) if count > 0 => {
                            debug!(count, "Outbox events dispatched");
                        }
                        Err(err) => {
                            error!(error = %err, "Outbox poll failed (will retry)");
                        }
                        _ => {}
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Outbox worker stopped");
    }

    /// One poll cycle: claim a batch, dispatch each row, settle its status.
    pub async fn poll_once(&self) -> Result<usize, AppError> {
        let batch = self
            .queue
            .claim_batch(&self.worker_id, self.config.batch_size, self.config.lock_ttl)
            .await?;

        let mut dispatched = 0;
        for entry in &batch {
            self.dispatch(entry).await?;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    async fn dispatch(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        let Some(processor) = self.processors.get(&entry.event_type) else {
            warn!(
                outbox_id = entry.id,
                event_type = %entry.event_type,
                "No processor registered, dead-lettering"
            );
            self.queue
                .mark_dead_letter(
                    entry.id,
                    &self.worker_id,
                    &format!("unknown event type: {}", entry.event_type),
                )
                .await?;
            return Ok(());
        };

        match processor.process(entry).await {
            Ok(()) => {
                self.queue.mark_completed(entry.id, &self.worker_id).await?;
                debug!(outbox_id = entry.id, event_type = %entry.event_type, "Event processed");
            }
            Err(err) => {
                let status = self
                    .queue
                    .mark_failed(
                        entry.id,
                        &self.worker_id,
                        &err.to_string(),
                        self.config.retry_base_delay,
                    )
                    .await?;

                match status {
                    OutboxStatus::DeadLetter => {
                        error!(
                            outbox_id = entry.id,
                            event_type = %entry.event_type,
                            error = %err,
                            "Event dead-lettered after max retries"
                        );
                    }
                    _ => {
                        warn!(
                            outbox_id = entry.id,
                            event_type = %entry.event_type,
                            retry = entry.retry_count + 1,
                            error = %err,
                            "Event processing failed, scheduled for retry"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use settle_domain::events::DomainEvent;
    use settle_store::MemoryOutboxQueue;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            max_retries: 5,
            retry_base_delay: Duration::from_millis(1),
            lock_ttl: Duration::from_secs(5),
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::PaymentCaptured {
            payment_id: 1,
            payee_account_id: 2,
            amount: dec!(100),
            fee_amount: dec!(3),
            timestamp: Utc::now(),
        }
    }

    /// Fails the first `failures` invocations, then succeeds. Counts calls.
    struct FlakyProcessor {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyProcessor {
        fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0) }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventProcessor for FlakyProcessor {
        async fn process(&self, _entry: &OutboxEntry) -> Result<(), AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(AppError::Chain("transient RPC failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_event_delivered_once_on_success() {
        let queue = Arc::new(MemoryOutboxQueue::new());
        let id = queue.push(&sample_event());

        let processor = Arc::new(FlakyProcessor::new(0));
        let mut worker = OutboxWorker::new(queue.clone(), worker_config());
        worker.register("payment_captured", processor.clone());

        assert_eq!(worker.poll_once().await.unwrap(), 1);
        assert_eq!(processor.call_count(), 1);
        assert_eq!(queue.entry(id).unwrap().status, OutboxStatus::Completed);

        // Completed events are never re-dispatched.
        assert_eq!(worker.poll_once().await.unwrap(), 0);
        assert_eq!(processor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        // Fails 3 times, succeeds on attempt 4: Pending → Processing →
        // Failed(1) → ... → Failed(3) → Processing → Completed.
        let queue = Arc::new(MemoryOutboxQueue::new());
        let id = queue.push(&sample_event());

        let processor = Arc::new(FlakyProcessor::new(3));
        let mut worker = OutboxWorker::new(queue.clone(), worker_config());
        worker.register("payment_captured", processor.clone());

        for attempt in 1..=3u32 {
            queue.make_due(id);
            worker.poll_once().await.unwrap();

            let entry = queue.entry(id).unwrap();
            assert_eq!(entry.status, OutboxStatus::Failed);
            assert_eq!(entry.retry_count as u32, attempt);
            assert_eq!(entry.error_message.as_deref(), Some("Blockchain RPC operation failed"));
        }

        queue.make_due(id);
        worker.poll_once().await.unwrap();

        assert_eq!(processor.call_count(), 4);
        assert_eq!(queue.entry(id).unwrap().status, OutboxStatus::Completed);

        // No invocation after Completed.
        queue.make_due(id);
        worker.poll_once().await.unwrap();
        assert_eq!(processor.call_count(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters() {
        let queue = Arc::new(MemoryOutboxQueue::new());
        let id = queue.push(&sample_event());

        let processor = Arc::new(FlakyProcessor::new(u32::MAX));
        let mut worker = OutboxWorker::new(queue.clone(), worker_config());
        worker.register("payment_captured", processor.clone());

        for _ in 0..10 {
            queue.make_due(id);
            worker.poll_once().await.unwrap();
        }

        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, OutboxStatus::DeadLetter);
        // Total attempts bounded by max_retries.
        assert_eq!(entry.retry_count, entry.max_retries);
        assert_eq!(processor.call_count(), entry.max_retries as u32);
    }

    #[tokio::test]
    async fn test_unknown_event_type_dead_letters() {
        let queue = Arc::new(MemoryOutboxQueue::new());
        let id = queue.push_raw("mystery_event", serde_json::json!({}));

        let worker = OutboxWorker::new(queue.clone(), worker_config());
        worker.poll_once().await.unwrap();

        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, OutboxStatus::DeadLetter);
        assert!(entry.error_message.unwrap().contains("unknown event type"));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let queue = Arc::new(MemoryOutboxQueue::new());
        let worker = OutboxWorker::new(queue, worker_config());

        let shutdown = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
    }
}
