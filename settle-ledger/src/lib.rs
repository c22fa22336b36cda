//! Double-Entry Ledger and Balance Engine
//!
//! Provides:
//! - Balance arithmetic over (available, held) pairs with typed failures
//! - A `BalancedBatch` builder that makes the double-entry invariant a
//!   precondition of posting
//! - The account engine: conditional updates on a version counter with a
//!   bounded read-then-CAS retry
//! - The poster: writes immutable ledger rows and applies balance effects
//!   atomically inside the caller's transaction
//!
//! The ledger is append-only; balance snapshots on the account row are a
//! materialized view over the log.

pub mod accounts;
pub mod balance;
pub mod batch;
pub mod poster;
pub mod types;

pub use accounts::{apply_effect, fetch_account, fetch_account_for_update};
pub use balance::Balances;
pub use batch::BalancedBatch;
pub use poster::{entries_for_account, entries_for_group, post_batch};
pub use types::{BalanceEffect, EntrySide, LedgerEntryRow, LedgerError, NewEntry, Result};
