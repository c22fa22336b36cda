//! Idempotency Cache
//!
//! Maps (client idempotency key, request body hash) to the stored response.
//! A replay with the same key and hash returns the stored response without
//! re-executing; the same key with a different hash is a conflict. Expired
//! rows are purged by the maintenance worker.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Default retention for non-payment operations.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Retention for payment-class operations.
pub const PAYMENT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// SHA-256 hex digest of a request body.
pub fn request_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Response captured for replays.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: i32,
    pub body: serde_json::Value,
}

/// Outcome of an idempotency lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyLookup {
    /// Key unseen (or expired): execute the handler.
    Miss,
    /// Same key, same request: replay the stored response.
    Hit(StoredResponse),
    /// Same key, different request body.
    Conflict,
}

/// Port over the idempotency cache.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, key: &str, request_hash: &str) -> Result<IdempotencyLookup, StoreError>;

    async fn store(
        &self,
        key: &str,
        request_path: &str,
        request_hash: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove expired rows; returns how many were purged.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

// =============================================================================
// Postgres adapter
// =============================================================================

pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(&self, key: &str, request_hash: &str) -> Result<IdempotencyLookup, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            request_hash: String,
            response_status: Option<i32>,
            response_body: Option<serde_json::Value>,
            expires_at: DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, Row>(
            "SELECT request_hash, response_status, response_body, expires_at \
             FROM idempotency_keys WHERE idem_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(IdempotencyLookup::Miss) };

        if row.expires_at <= Utc::now() {
            return Ok(IdempotencyLookup::Miss);
        }

        if row.request_hash != request_hash {
            return Ok(IdempotencyLookup::Conflict);
        }

        match (row.response_status, row.response_body) {
            (Some(status), Some(body)) => {
                Ok(IdempotencyLookup::Hit(StoredResponse { status, body }))
            }
            // Key reserved but no response stored yet (in-flight request).
            _ => Ok(IdempotencyLookup::Conflict),
        }
    }

    async fn store(
        &self,
        key: &str,
        request_path: &str,
        request_hash: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl)
                .map_err(|e| StoreError::invalid_state(format!("Bad ttl: {}", e)))?;

        sqlx::query(
            "INSERT INTO idempotency_keys \
             (idem_key, request_path, request_hash, response_status, response_body, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (idem_key) DO NOTHING",
        )
        .bind(key)
        .bind(request_path)
        .bind(request_hash)
        .bind(response.status)
        .bind(&response.body)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// In-memory adapter
// =============================================================================

struct MemoryEntry {
    request_hash: String,
    response: StoredResponse,
    expires_at: DateTime<Utc>,
}

/// In-memory idempotency cache for tests.
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn lookup(&self, key: &str, request_hash: &str) -> Result<IdempotencyLookup, StoreError> {
        let entries = self.entries.lock().unwrap();

        let Some(entry) = entries.get(key) else { return Ok(IdempotencyLookup::Miss) };

        if entry.expires_at <= Utc::now() {
            return Ok(IdempotencyLookup::Miss);
        }

        if entry.request_hash != request_hash {
            return Ok(IdempotencyLookup::Conflict);
        }

        Ok(IdempotencyLookup::Hit(entry.response.clone()))
    }

    async fn store(
        &self,
        key: &str,
        _request_path: &str,
        request_hash: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl)
                .map_err(|e| StoreError::invalid_state(format!("Bad ttl: {}", e)))?;

        let mut entries = self.entries.lock().unwrap();
        entries.entry(key.to_string()).or_insert(MemoryEntry {
            request_hash: request_hash.to_string(),
            response: response.clone(),
            expires_at,
        });

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> StoredResponse {
        StoredResponse { status: 200, body: json!({"data": {"payment_id": 1}}) }
    }

    #[test]
    fn test_request_hash_is_stable() {
        let a = request_hash(b"{\"amount\":\"100\"}");
        let b = request_hash(b"{\"amount\":\"100\"}");
        let c = request_hash(b"{\"amount\":\"101\"}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = MemoryIdempotencyStore::new();
        let hash = request_hash(b"body");

        assert_eq!(store.lookup("k1", &hash).await.unwrap(), IdempotencyLookup::Miss);

        store.store("k1", "/payments/authorize", &hash, &response(), DEFAULT_TTL).await.unwrap();

        match store.lookup("k1", &hash).await.unwrap() {
            IdempotencyLookup::Hit(stored) => assert_eq!(stored, response()),
            other => panic!("Expected Hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_key_different_body_conflicts() {
        let store = MemoryIdempotencyStore::new();
        let hash = request_hash(b"body-a");
        store.store("k1", "/payments/authorize", &hash, &response(), DEFAULT_TTL).await.unwrap();

        let other_hash = request_hash(b"body-b");
        assert_eq!(
            store.lookup("k1", &other_hash).await.unwrap(),
            IdempotencyLookup::Conflict
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = MemoryIdempotencyStore::new();
        let hash = request_hash(b"body");
        store
            .store("k1", "/x", &hash, &response(), Duration::from_millis(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.lookup("k1", &hash).await.unwrap(), IdempotencyLookup::Miss);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_store_wins() {
        let store = MemoryIdempotencyStore::new();
        let hash = request_hash(b"body");
        store.store("k1", "/x", &hash, &response(), DEFAULT_TTL).await.unwrap();

        let second = StoredResponse { status: 500, body: json!({"error": "late"}) };
        store.store("k1", "/x", &hash, &second, DEFAULT_TTL).await.unwrap();

        match store.lookup("k1", &hash).await.unwrap() {
            IdempotencyLookup::Hit(stored) => assert_eq!(stored.status, 200),
            other => panic!("Expected Hit, got {:?}", other),
        }
    }
}
