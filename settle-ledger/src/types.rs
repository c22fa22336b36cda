//! Ledger Types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_domain::value_objects::DomainError;
use sqlx::FromRow;
use uuid::Uuid;

/// Side of a double-entry row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "debit",
            EntrySide::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(EntrySide::Debit),
            "credit" => Some(EntrySide::Credit),
            _ => None,
        }
    }
}

/// How an entry (or a direct engine call) mutates the account balances.
///
/// Debit/Credit move the available balance; Hold parks available funds in
/// the held balance, Release returns them, Capture consumes held funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceEffect {
    Debit,
    Credit,
    Hold,
    Release,
    Capture,
}

impl BalanceEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceEffect::Debit => "debit",
            BalanceEffect::Credit => "credit",
            BalanceEffect::Hold => "hold",
            BalanceEffect::Release => "release",
            BalanceEffect::Capture => "capture",
        }
    }
}

/// An entry to be posted: which account, which side of the group, and which
/// balance effect it applies. The caller declares the effect; the poster only
/// enforces that the sides balance.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: i64,
    pub side: EntrySide,
    pub effect: BalanceEffect,
    pub amount: Decimal,
    pub reference_type: String,
    pub reference_id: i64,
    pub description: String,
}

/// A persisted, immutable ledger row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub transaction_group_id: Uuid,
    pub account_id: i64,
    pub side: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_type: String,
    pub reference_id: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger and balance engine errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Debit and credit sums differ
    #[error("Unbalanced entries: debit {debit} != credit {credit}")]
    Unbalanced { debit: Decimal, credit: Decimal },

    /// Available balance too low for a debit or hold
    #[error("Insufficient balance: available {available} < requested {requested}")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    /// Held balance too low for a release or capture
    #[error("Insufficient hold: held {held} < requested {requested}")]
    InsufficientHold { held: Decimal, requested: Decimal },

    /// Version CAS kept failing after retries
    #[error("Optimistic conflict on account {0} after retries")]
    OptimisticConflict(i64),

    /// Closed accounts accept no balance mutations
    #[error("Account {0} is closed")]
    AccountClosed(i64),

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    /// Storage-layer CHECK violations and other bugs
    #[error("Internal ledger error: {0}")]
    Internal(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
