//! Storage Layer
//!
//! Repositories for the status-bearing aggregates, the transactional outbox
//! queue, the idempotency cache, and the unit-of-work runner.
//!
//! # Architecture
//!
//! - Repository functions take any `PgExecutor` (pool or transaction) and
//!   bind at runtime; none require a database at compile time.
//! - The outbox queue and idempotency cache are ports with Postgres and
//!   in-memory adapters; tests run against the memory adapters.
//! - `TxRunner` is the single place commit/rollback policy lives.

#![warn(clippy::all)]

pub mod audit;
pub mod error;
pub mod funding;
pub mod idempotency;
pub mod inventory;
pub mod orders;
pub mod outbox;
pub mod payments;
pub mod settlements;
pub mod tx;
pub mod users;
pub mod wallets;

pub use error::StoreError;
pub use idempotency::{
    request_hash, IdempotencyLookup, IdempotencyStore, MemoryIdempotencyStore,
    PgIdempotencyStore, StoredResponse,
};
pub use outbox::{
    backoff_delay, enqueue_tx, MemoryOutboxQueue, OutboxEntry, OutboxQueue, OutboxStatus,
    PgOutboxQueue,
};
pub use tx::{TxError, TxRunner};
