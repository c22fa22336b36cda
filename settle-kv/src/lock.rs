//! Distributed Lock
//!
//! Per-resource named lock with an opaque owner token and TTL. Release and
//! extension compare the stored token server-side in a single script, so a
//! non-holder can never delete or prolong someone else's lock. The lock
//! complements, not replaces, optimistic versioning on the database rows.
//!
//! Callers taking multiple locks must acquire them in ascending resource
//! order to stay deadlock-free.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Key format: `lock:{resource}`
fn build_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

/// Port for distributed lock backends.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Atomically claim the resource. Returns the owner token, or
    /// `LockNotAcquired` when somebody else holds it.
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<String, KvError>;

    /// Delete the key only if it still carries this owner's token.
    /// A non-holder gets `LockNotHeld` and the key is untouched.
    async fn release(&self, resource: &str, token: &str) -> Result<(), KvError>;

    /// Reset the TTL, only while still owned by this token.
    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<(), KvError>;
}

// =============================================================================
// Redis adapter
// =============================================================================

// Check-and-delete / check-and-expire must be atomic with respect to the
// token comparison, hence server-side scripts.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("EXPIRE", KEYS[1], ARGV[2])
else
    return 0
end"#;

pub struct RedisLockManager {
    conn: ConnectionManager,
    release_script: redis::Script,
    extend_script: redis::Script,
}

impl RedisLockManager {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: redis::Script::new(RELEASE_SCRIPT),
            extend_script: redis::Script::new(EXTEND_SCRIPT),
        }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<String, KvError> {
        let key = build_key(resource);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(resource, "Lock acquired");
                Ok(token)
            }
            None => Err(KvError::LockNotAcquired { resource: resource.to_string() }),
        }
    }

    async fn release(&self, resource: &str, token: &str) -> Result<(), KvError> {
        let key = build_key(resource);
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .release_script
            .key(&key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            return Err(KvError::LockNotHeld { resource: resource.to_string() });
        }

        debug!(resource, "Lock released");
        Ok(())
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<(), KvError> {
        let key = build_key(resource);
        let mut conn = self.conn.clone();

        let extended: i64 = self
            .extend_script
            .key(&key)
            .arg(token)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        if extended == 0 {
            return Err(KvError::LockNotHeld { resource: resource.to_string() });
        }

        Ok(())
    }
}

// =============================================================================
// In-memory adapter
// =============================================================================

/// In-memory lock manager for tests and Redis-less development.
pub struct MemoryLockManager {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Current holder token of a resource, if any (test observability).
    pub fn holder(&self, resource: &str) -> Option<String> {
        let locks = self.locks.lock().unwrap();
        locks
            .get(&build_key(resource))
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(token, _)| token.clone())
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<String, KvError> {
        let key = build_key(resource);
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();

        if let Some((_, expires)) = locks.get(&key) {
            if *expires > now {
                return Err(KvError::LockNotAcquired { resource: resource.to_string() });
            }
        }

        let token = Uuid::new_v4().to_string();
        locks.insert(key, (token.clone(), now + ttl));
        Ok(token)
    }

    async fn release(&self, resource: &str, token: &str) -> Result<(), KvError> {
        let key = build_key(resource);
        let mut locks = self.locks.lock().unwrap();

        match locks.get(&key) {
            Some((held, _)) if held == token => {
                locks.remove(&key);
                Ok(())
            }
            _ => Err(KvError::LockNotHeld { resource: resource.to_string() }),
        }
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<(), KvError> {
        let key = build_key(resource);
        let mut locks = self.locks.lock().unwrap();

        match locks.get_mut(&key) {
            Some((held, expires)) if held == token => {
                *expires = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(KvError::LockNotHeld { resource: resource.to_string() }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_acquire_contention() {
        let locks = MemoryLockManager::new();
        let token = locks.acquire("inventory:1", TTL).await.unwrap();

        let err = locks.acquire("inventory:1", TTL).await.unwrap_err();
        assert!(matches!(err, KvError::LockNotAcquired { .. }));

        // A different resource is unaffected.
        locks.acquire("inventory:2", TTL).await.unwrap();

        locks.release("inventory:1", &token).await.unwrap();
        locks.acquire("inventory:1", TTL).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_by_non_holder_leaves_key() {
        let locks = MemoryLockManager::new();
        let token = locks.acquire("order:7", TTL).await.unwrap();

        let err = locks.release("order:7", "not-the-token").await.unwrap_err();
        assert!(matches!(err, KvError::LockNotHeld { .. }));

        // Still held by the original owner.
        assert_eq!(locks.holder("order:7"), Some(token.clone()));
        locks.release("order:7", &token).await.unwrap();
        assert_eq!(locks.holder("order:7"), None);
    }

    #[tokio::test]
    async fn test_extend_only_by_holder() {
        let locks = MemoryLockManager::new();
        let token = locks.acquire("order:7", TTL).await.unwrap();

        locks.extend("order:7", &token, TTL).await.unwrap();

        let err = locks.extend("order:7", "other", TTL).await.unwrap_err();
        assert!(matches!(err, KvError::LockNotHeld { .. }));
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let locks = MemoryLockManager::new();
        let stale = locks.acquire("order:7", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        // TTL is the safety net: a crashed holder's lock frees itself.
        let fresh = locks.acquire("order:7", TTL).await.unwrap();
        assert_ne!(stale, fresh);

        // The stale token can no longer release.
        let err = locks.release("order:7", &stale).await.unwrap_err();
        assert!(matches!(err, KvError::LockNotHeld { .. }));
    }

    #[tokio::test]
    async fn test_release_missing_lock_is_not_held() {
        let locks = MemoryLockManager::new();
        let err = locks.release("ghost", "token").await.unwrap_err();
        assert!(matches!(err, KvError::LockNotHeld { .. }));
    }
}
