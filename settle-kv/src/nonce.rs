//! Nonce Store
//!
//! At-most-once reservation of signature nonces. Reservation is an atomic
//! set-if-absent with TTL; `mark_used` pins the nonce as consumed after a
//! successful verification; `release` deletes a reservation so a legitimate
//! retry may reuse the nonce after a failed verification.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default nonce validity window.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

/// Key format: `nonce:{lowercased address}:{nonce}`
fn build_key(address: &str, nonce: &str) -> String {
    format!("nonce:{}:{}", address.to_lowercase(), nonce)
}

/// Port for nonce reservation backends.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Reserve a nonce. Fails with `NonceReused` when it is already
    /// reserved or used.
    async fn reserve(&self, address: &str, nonce: &str) -> Result<(), KvError>;

    /// Mark a reserved nonce as used (terminal).
    async fn mark_used(&self, address: &str, nonce: &str) -> Result<(), KvError>;

    /// Release a reservation so the same nonce can be retried.
    async fn release(&self, address: &str, nonce: &str) -> Result<(), KvError>;
}

// =============================================================================
// Redis adapter
// =============================================================================

pub struct RedisNonceStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisNonceStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, ttl: DEFAULT_NONCE_TTL }
    }

    pub fn with_ttl(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn reserve(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut conn = self.conn.clone();

        // SET NX EX: only succeeds if the key does not exist.
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("reserved")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(address, nonce, "Nonce reserved");
                Ok(())
            }
            None => {
                warn!(address, nonce, "Nonce already used or reserved");
                Err(KvError::NonceReused)
            }
        }
    }

    async fn mark_used(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(&key)
            .arg("used")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(address, nonce, "Nonce marked used");
        Ok(())
    }

    async fn release(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut conn = self.conn.clone();

        redis::cmd("DEL").arg(&key).query_async::<_, ()>(&mut conn).await?;

        debug!(address, nonce, "Nonce released");
        Ok(())
    }
}

// =============================================================================
// In-memory adapter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NonceState {
    Reserved,
    Used,
}

/// In-memory nonce store for tests and Redis-less development.
pub struct MemoryNonceStore {
    entries: RwLock<HashMap<String, (NonceState, Instant)>>,
    ttl: Duration,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_NONCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    fn purge_expired(entries: &mut HashMap<String, (NonceState, Instant)>) {
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
    }
}

impl Default for MemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn reserve(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut entries = self.entries.write().unwrap();
        Self::purge_expired(&mut entries);

        if entries.contains_key(&key) {
            return Err(KvError::NonceReused);
        }

        entries.insert(key, (NonceState::Reserved, Instant::now() + self.ttl));
        Ok(())
    }

    async fn mark_used(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut entries = self.entries.write().unwrap();
        entries.insert(key, (NonceState::Used, Instant::now() + self.ttl));
        Ok(())
    }

    async fn release(&self, address: &str, nonce: &str) -> Result<(), KvError> {
        let key = build_key(address, nonce);
        let mut entries = self.entries.write().unwrap();
        entries.remove(&key);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xAbC0000000000000000000000000000000000001";

    #[tokio::test]
    async fn test_reserve_twice_fails() {
        let store = MemoryNonceStore::new();
        store.reserve(ADDR, "n1").await.unwrap();

        let err = store.reserve(ADDR, "n1").await.unwrap_err();
        assert!(matches!(err, KvError::NonceReused));
    }

    #[tokio::test]
    async fn test_key_is_case_insensitive_on_address() {
        let store = MemoryNonceStore::new();
        store.reserve(ADDR, "n1").await.unwrap();

        // Same address in different case collides.
        let err = store.reserve(&ADDR.to_lowercase(), "n1").await.unwrap_err();
        assert!(matches!(err, KvError::NonceReused));
    }

    #[tokio::test]
    async fn test_release_allows_retry() {
        let store = MemoryNonceStore::new();
        store.reserve(ADDR, "n1").await.unwrap();
        store.release(ADDR, "n1").await.unwrap();
        store.reserve(ADDR, "n1").await.unwrap();
    }

    #[tokio::test]
    async fn test_used_nonce_cannot_be_reserved() {
        let store = MemoryNonceStore::new();
        store.reserve(ADDR, "n1").await.unwrap();
        store.mark_used(ADDR, "n1").await.unwrap();

        let err = store.reserve(ADDR, "n1").await.unwrap_err();
        assert!(matches!(err, KvError::NonceReused));
    }

    #[tokio::test]
    async fn test_different_nonces_are_independent() {
        let store = MemoryNonceStore::new();
        store.reserve(ADDR, "n1").await.unwrap();
        store.reserve(ADDR, "n2").await.unwrap();
        store
            .reserve("0xabc0000000000000000000000000000000000002", "n1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_reservation_frees_the_nonce() {
        let store = MemoryNonceStore::with_ttl(Duration::from_millis(10));
        store.reserve(ADDR, "n1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.reserve(ADDR, "n1").await.unwrap();
    }
}
