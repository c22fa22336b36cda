//! Key-Value Primitives
//!
//! Redis-backed concurrency primitives behind ports:
//! - **Nonce store**: at-most-once reservation of signature nonces with TTL
//!   (`nonce:<lowercased address>:<nonce>` → "reserved" | "used")
//! - **Distributed lock**: owner-token lock with TTL, atomic check-and-delete
//!   release and TTL extension via server-side scripts
//!   (`lock:<resource>` → token)
//!
//! Each port has an in-memory adapter used by tests and by environments
//! without Redis.

mod client;
mod error;
mod lock;
mod nonce;

pub use client::{connect, ping, RedisConfig};
pub use error::KvError;
pub use lock::{LockManager, MemoryLockManager, RedisLockManager};
pub use nonce::{MemoryNonceStore, NonceStore, RedisNonceStore, DEFAULT_NONCE_TTL};
