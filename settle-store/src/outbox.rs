//! Transactional Outbox
//!
//! Write side: `enqueue_tx` inserts the event in the same transaction as the
//! business write, so an event exists exactly when its transaction
//! committed. Worker side: `OutboxQueue` is the port the dispatcher drives.
//! It covers the atomic claim with a lease, completion, failure with
//! exponential backoff, and dead-lettering. Only the leaseholder may
//! transition a Processing row.
//!
//! Rows left in Processing past their lease expiry become claimable again;
//! that is the crashed-worker recovery path, and the reason processors must
//! be duplicate-safe (at-least-once delivery).

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use settle_domain::events::DomainEvent;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Default retry ceiling before dead-lettering.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Outbox row lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "processing" => Some(OutboxStatus::Processing),
            "completed" => Some(OutboxStatus::Completed),
            "failed" => Some(OutboxStatus::Failed),
            "dead_letter" => Some(OutboxStatus::DeadLetter),
            _ => None,
        }
    }
}

/// One outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Exponential backoff: delay(n) = base × 2^(n−1), so 1s, 2s, 4s, 8s, ...
/// for a one-second base.
pub fn backoff_delay(base: Duration, retry_count: i32) -> Duration {
    let n = retry_count.max(1) as u32;
    let factor = 1u32 << (n - 1).min(16);
    base.saturating_mul(factor)
}

/// Enqueue a domain event inside the caller's unit of work.
pub async fn enqueue_tx(
    tx: &mut Transaction<'_, Postgres>,
    event: &DomainEvent,
) -> Result<i64, StoreError> {
    let payload = serde_json::to_value(event)?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO outbox (event_type, aggregate_type, aggregate_id, payload, max_retries) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(event.event_type())
    .bind(event.aggregate_type())
    .bind(event.aggregate_id())
    .bind(&payload)
    .bind(DEFAULT_MAX_RETRIES)
    .fetch_one(&mut **tx)
    .await?;

    debug!(outbox_id = id, event_type = event.event_type(), "Outbox event enqueued");
    Ok(id)
}

/// Worker-side port over the outbox table.
#[async_trait]
pub trait OutboxQueue: Send + Sync {
    /// Atomically claim up to `batch_size` due rows: Pending/Failed rows past
    /// `next_retry_at`, plus Processing rows whose lease expired. Claimed
    /// rows are set Processing with a fresh lease for `worker_id`.
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        lease_ttl: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Leaseholder-only: Processing → Completed (terminal).
    async fn mark_completed(&self, id: i64, worker_id: &str) -> Result<(), StoreError>;

    /// Leaseholder-only: bump retry_count; DeadLetter when the ceiling is
    /// reached, else Failed with `next_retry_at = now + backoff`. Returns the
    /// resulting status.
    async fn mark_failed(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        base_delay: Duration,
    ) -> Result<OutboxStatus, StoreError>;

    /// Leaseholder-only: park the row permanently (e.g. unknown event type).
    async fn mark_dead_letter(&self, id: i64, worker_id: &str, reason: &str)
        -> Result<(), StoreError>;
}

// =============================================================================
// Postgres adapter
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    aggregate_type: String,
    aggregate_id: i64,
    payload: serde_json::Value,
    status: String,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: DateTime<Utc>,
    error_message: Option<String>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OutboxRow {
    fn into_entry(self) -> Result<OutboxEntry, StoreError> {
        let status = OutboxStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown outbox status: {}", self.status))
        })?;

        Ok(OutboxEntry {
            id: self.id,
            event_type: self.event_type,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            payload: self.payload,
            status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            next_retry_at: self.next_retry_at,
            error_message: self.error_message,
            lease_owner: self.lease_owner,
            lease_expires_at: self.lease_expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const OUTBOX_COLUMNS: &str =
    "id, event_type, aggregate_type, aggregate_id, payload, status, retry_count, max_retries, \
     next_retry_at, error_message, lease_owner, lease_expires_at, created_at, updated_at";

pub struct PgOutboxQueue {
    pool: PgPool,
}

impl PgOutboxQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxQueue for PgOutboxQueue {
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        lease_ttl: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let now = Utc::now();
        let lease_expires = now
            + ChronoDuration::from_std(lease_ttl)
                .map_err(|e| StoreError::invalid_state(format!("Bad lease ttl: {}", e)))?;

        // Single atomic claim so concurrent worker replicas never share a row.
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "UPDATE outbox SET status = 'processing', lease_owner = $1, \
             lease_expires_at = $2, updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM outbox \
                 WHERE retry_count < max_retries \
                   AND ((status IN ('pending', 'failed') AND next_retry_at <= $3) \
                        OR (status = 'processing' AND lease_expires_at <= $3)) \
                 ORDER BY created_at \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {}",
            OUTBOX_COLUMNS
        ))
        .bind(worker_id)
        .bind(lease_expires)
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    async fn mark_completed(&self, id: i64, worker_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'completed', lease_owner = NULL, \
             lease_expires_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' AND lease_owner = $2",
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::invalid_state(format!(
                "Outbox row {} not held by worker {}",
                id, worker_id
            )));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        base_delay: Duration,
    ) -> Result<OutboxStatus, StoreError> {
        // Only the leaseholder reaches this path, so read-then-write is safe.
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {} FROM outbox WHERE id = $1 AND status = 'processing' AND lease_owner = $2",
            OUTBOX_COLUMNS
        ))
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::invalid_state(format!("Outbox row {} not held by worker {}", id, worker_id))
        })?;

        let retry_count = row.retry_count + 1;
        let (status, next_retry_at) = if retry_count >= row.max_retries {
            (OutboxStatus::DeadLetter, row.next_retry_at)
        } else {
            let delay = backoff_delay(base_delay, retry_count);
            let next = Utc::now()
                + ChronoDuration::from_std(delay)
                    .map_err(|e| StoreError::invalid_state(format!("Bad backoff: {}", e)))?;
            (OutboxStatus::Failed, next)
        };

        let result = sqlx::query(
            "UPDATE outbox SET status = $1, retry_count = $2, next_retry_at = $3, \
             error_message = $4, lease_owner = NULL, lease_expires_at = NULL, \
             updated_at = NOW() \
             WHERE id = $5 AND status = 'processing' AND lease_owner = $6",
        )
        .bind(status.as_str())
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(error)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::invalid_state(format!(
                "Outbox row {} not held by worker {}",
                id, worker_id
            )));
        }
        Ok(status)
    }

    async fn mark_dead_letter(
        &self,
        id: i64,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'dead_letter', error_message = $1, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE id = $2 AND status = 'processing' AND lease_owner = $3",
        )
        .bind(reason)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::invalid_state(format!(
                "Outbox row {} not held by worker {}",
                id, worker_id
            )));
        }
        Ok(())
    }
}

// =============================================================================
// In-memory adapter
// =============================================================================

/// In-memory queue with the same claim/lease semantics, for worker tests.
pub struct MemoryOutboxQueue {
    entries: Mutex<HashMap<i64, OutboxEntry>>,
    next_id: AtomicI64,
}

impl MemoryOutboxQueue {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), next_id: AtomicI64::new(1) }
    }

    /// Write-side equivalent of `enqueue_tx` for tests.
    pub fn push(&self, event: &DomainEvent) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let entry = OutboxEntry {
            id,
            event_type: event.event_type().to_string(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id(),
            payload: serde_json::to_value(event).expect("event serializes"),
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: now,
            error_message: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.entries.lock().unwrap().insert(id, entry);
        id
    }

    /// Push a raw event type (tests for unknown-type dead-lettering).
    pub fn push_raw(&self, event_type: &str, payload: serde_json::Value) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let entry = OutboxEntry {
            id,
            event_type: event_type.to_string(),
            aggregate_type: "unknown".to_string(),
            aggregate_id: 0,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: now,
            error_message: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.entries.lock().unwrap().insert(id, entry);
        id
    }

    /// Snapshot of one row (test observability).
    pub fn entry(&self, id: i64) -> Option<OutboxEntry> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    /// Force a row due now (tests skip real backoff waits).
    pub fn make_due(&self, id: i64) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&id) {
            entry.next_retry_at = Utc::now();
        }
    }

    fn with_held_entry<T>(
        &self,
        id: i64,
        worker_id: &str,
        f: impl FnOnce(&mut OutboxEntry) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&id) {
            Some(entry)
                if entry.status == OutboxStatus::Processing
                    && entry.lease_owner.as_deref() == Some(worker_id) =>
            {
                Ok(f(entry))
            }
            _ => Err(StoreError::invalid_state(format!(
                "Outbox row {} not held by worker {}",
                id, worker_id
            ))),
        }
    }
}

impl Default for MemoryOutboxQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxQueue for MemoryOutboxQueue {
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        lease_ttl: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let now = Utc::now();
        let lease_expires = now
            + ChronoDuration::from_std(lease_ttl)
                .map_err(|e| StoreError::invalid_state(format!("Bad lease ttl: {}", e)))?;

        let mut entries = self.entries.lock().unwrap();

        let mut due: Vec<i64> = entries
            .values()
            .filter(|e| {
                e.retry_count < e.max_retries
                    && match e.status {
                        OutboxStatus::Pending | OutboxStatus::Failed => e.next_retry_at <= now,
                        OutboxStatus::Processing => {
                            e.lease_expires_at.map(|exp| exp <= now).unwrap_or(false)
                        }
                        _ => false,
                    }
            })
            .map(|e| e.id)
            .collect();
        due.sort_by_key(|id| (entries.get(id).map(|e| e.created_at).unwrap_or(now), *id));
        due.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let entry = entries.get_mut(&id).expect("id from same map");
            entry.status = OutboxStatus::Processing;
            entry.lease_owner = Some(worker_id.to_string());
            entry.lease_expires_at = Some(lease_expires);
            entry.updated_at = now;
            claimed.push(entry.clone());
        }

        Ok(claimed)
    }

    async fn mark_completed(&self, id: i64, worker_id: &str) -> Result<(), StoreError> {
        self.with_held_entry(id, worker_id, |entry| {
            entry.status = OutboxStatus::Completed;
            entry.lease_owner = None;
            entry.lease_expires_at = None;
            entry.updated_at = Utc::now();
        })
    }

    async fn mark_failed(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        base_delay: Duration,
    ) -> Result<OutboxStatus, StoreError> {
        self.with_held_entry(id, worker_id, |entry| {
            entry.retry_count += 1;
            entry.error_message = Some(error.to_string());
            entry.lease_owner = None;
            entry.lease_expires_at = None;
            entry.updated_at = Utc::now();

            if entry.retry_count >= entry.max_retries {
                entry.status = OutboxStatus::DeadLetter;
            } else {
                let delay = backoff_delay(base_delay, entry.retry_count);
                entry.status = OutboxStatus::Failed;
                entry.next_retry_at = Utc::now()
                    + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
            }
            entry.status
        })
    }

    async fn mark_dead_letter(
        &self,
        id: i64,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.with_held_entry(id, worker_id, |entry| {
            entry.status = OutboxStatus::DeadLetter;
            entry.error_message = Some(reason.to_string());
            entry.lease_owner = None;
            entry.lease_expires_at = None;
            entry.updated_at = Utc::now();
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const LEASE: Duration = Duration::from_secs(30);
    const BASE: Duration = Duration::from_secs(1);

    fn sample_event() -> DomainEvent {
        DomainEvent::PaymentAuthorized {
            payment_id: 1,
            payer_account_id: 1,
            amount: dec!(100),
            expires_at: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(BASE, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(BASE, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(BASE, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(BASE, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(BASE, 5), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_claim_sets_lease_and_hides_row() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        let claimed = queue.claim_batch("w1", 10, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);
        assert_eq!(claimed[0].lease_owner.as_deref(), Some("w1"));

        // A second worker sees nothing while the lease is live.
        let other = queue.claim_batch("w2", 10, LEASE).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        queue.claim_batch("w1", 10, LEASE).await.unwrap();
        queue.mark_completed(id, "w1").await.unwrap();

        assert_eq!(queue.entry(id).unwrap().status, OutboxStatus::Completed);
        // Never re-dispatched.
        assert!(queue.claim_batch("w1", 10, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_backoff_then_dead_letter() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        for attempt in 1..=DEFAULT_MAX_RETRIES {
            queue.make_due(id);
            let claimed = queue.claim_batch("w1", 10, LEASE).await.unwrap();
            assert_eq!(claimed.len(), 1, "attempt {} should claim the row", attempt);

            let status = queue.mark_failed(id, "w1", "boom", BASE).await.unwrap();
            let expected = if attempt >= DEFAULT_MAX_RETRIES {
                OutboxStatus::DeadLetter
            } else {
                OutboxStatus::Failed
            };
            assert_eq!(status, expected);

            let entry = queue.entry(id).unwrap();
            assert_eq!(entry.retry_count, attempt);
            assert_eq!(entry.error_message.as_deref(), Some("boom"));
        }

        // Dead-lettered rows are never claimed again.
        queue.make_due(id);
        assert!(queue.claim_batch("w1", 10, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_row_not_due_until_backoff_elapses() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        queue.claim_batch("w1", 10, LEASE).await.unwrap();
        queue.mark_failed(id, "w1", "transient", Duration::from_secs(60)).await.unwrap();

        // next_retry_at is a minute out; nothing to claim yet.
        assert!(queue.claim_batch("w1", 10, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        // Claim with a tiny lease, then let it lapse.
        queue.claim_batch("w1", 10, Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reclaimed = queue.claim_batch("w2", 10, LEASE).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
        assert_eq!(reclaimed[0].lease_owner.as_deref(), Some("w2"));

        // The original worker lost its lease and may no longer transition.
        assert!(queue.mark_completed(id, "w1").await.is_err());
        queue.mark_completed(id, "w2").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_leaseholder_cannot_transition() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push(&sample_event());

        queue.claim_batch("w1", 10, LEASE).await.unwrap();

        assert!(queue.mark_completed(id, "w2").await.is_err());
        assert!(queue.mark_failed(id, "w2", "x", BASE).await.is_err());
        assert!(queue.mark_dead_letter(id, "w2", "x").await.is_err());

        // Row is untouched for the real holder.
        queue.mark_completed(id, "w1").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_size_respected_in_created_order() {
        let queue = MemoryOutboxQueue::new();
        let first = queue.push(&sample_event());
        let _second = queue.push(&sample_event());
        let _third = queue.push(&sample_event());

        let claimed = queue.claim_batch("w1", 1, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
    }
}
