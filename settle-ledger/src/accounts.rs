//! Account Engine
//!
//! Balance mutations under optimistic versioning: read (id, version), apply
//! the effect in memory, then a conditional update bumping the version.
//! Zero affected rows means the CAS lost; retry up to [`CAS_ATTEMPTS`] times
//! before surfacing `OptimisticConflict`. The CHECK constraints on the table
//! are a second guard; a violation surfaces as `Internal`.

use crate::balance::Balances;
use crate::types::{BalanceEffect, LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::{Account, AccountStatus, AccountType};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

/// Read-then-CAS attempts before giving up.
pub const CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    external_id: Uuid,
    account_type: String,
    owner_id: Option<i64>,
    primary_wallet_id: Option<i64>,
    available_balance: Decimal,
    held_balance: Decimal,
    version: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        let account_type = AccountType::parse(&self.account_type).ok_or_else(|| {
            LedgerError::Internal(format!("Unknown account type: {}", self.account_type))
        })?;
        let status = AccountStatus::parse(&self.status).ok_or_else(|| {
            LedgerError::Internal(format!("Unknown account status: {}", self.status))
        })?;

        Ok(Account {
            id: self.id,
            external_id: self.external_id,
            account_type,
            owner_id: self.owner_id,
            primary_wallet_id: self.primary_wallet_id,
            available_balance: self.available_balance,
            held_balance: self.held_balance,
            version: self.version,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ACCOUNT: &str = "SELECT id, external_id, account_type, owner_id, primary_wallet_id, \
     available_balance, held_balance, version, status, created_at, updated_at \
     FROM accounts WHERE id = $1";

/// Fetch an account without locking.
pub async fn fetch_account(pool: &PgPool, account_id: i64) -> Result<Account> {
    let row = sqlx::query_as::<_, AccountRow>(SELECT_ACCOUNT)
        .bind(account_id)
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    row.into_account()
}

/// Fetch an account by its external id; `None` when no such account.
pub async fn fetch_account_by_external_id(
    pool: &PgPool,
    external_id: Uuid,
) -> Result<Option<Account>> {
    let row = sqlx::query_as::<_, AccountRow>(
        "SELECT id, external_id, account_type, owner_id, primary_wallet_id, \
         available_balance, held_balance, version, status, created_at, updated_at \
         FROM accounts WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.map(AccountRow::into_account).transpose()
}

/// Fetch an account with a row lock inside the current transaction.
pub async fn fetch_account_for_update(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
) -> Result<Account> {
    let row = sqlx::query_as::<_, AccountRow>(&format!("{} FOR UPDATE", SELECT_ACCOUNT))
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    row.into_account()
}

/// Conditional balance update against the locked row inside a transaction.
///
/// The caller has already taken the row lock, so a lost CAS here means a
/// logic error rather than contention; it is not retried.
pub async fn update_balances_tx(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    expected_version: i64,
    balances: Balances,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE accounts SET available_balance = $1, held_balance = $2, \
         version = version + 1, updated_at = NOW() \
         WHERE id = $3 AND version = $4",
    )
    .bind(balances.available)
    .bind(balances.held)
    .bind(account_id)
    .bind(expected_version)
    .execute(&mut **tx)
    .await
    .map_err(map_check_violation)?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::Internal(format!(
            "Version moved under row lock for account {}",
            account_id
        )));
    }

    Ok(())
}

/// Apply a balance effect inside the caller's transaction, serialized by the
/// row lock. Used by services that need an entry-less effect (hold, release,
/// capture) to land atomically with other writes in the same unit of work.
pub async fn apply_effect_tx(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    effect: BalanceEffect,
    amount: Decimal,
) -> Result<Account> {
    let account = fetch_account_for_update(tx, account_id).await?;

    if account.status == AccountStatus::Closed {
        return Err(LedgerError::AccountClosed(account_id));
    }

    let next =
        Balances::new(account.available_balance, account.held_balance).apply(effect, amount)?;

    update_balances_tx(tx, account.id, account.version, next).await?;

    Ok(Account {
        available_balance: next.available,
        held_balance: next.held,
        version: account.version + 1,
        ..account
    })
}

/// Apply a single balance effect to an account with the read-then-CAS loop.
///
/// Returns the post-state. Used for direct engine calls that carry no ledger
/// entry (for example capturing the payer hold); entry-bearing mutations go
/// through the poster instead.
pub async fn apply_effect(
    pool: &PgPool,
    account_id: i64,
    effect: BalanceEffect,
    amount: Decimal,
) -> Result<Account> {
    for attempt in 1..=CAS_ATTEMPTS {
        let account = fetch_account(pool, account_id).await?;

        if account.status == AccountStatus::Closed {
            return Err(LedgerError::AccountClosed(account_id));
        }

        let next = Balances::new(account.available_balance, account.held_balance)
            .apply(effect, amount)?;

        let result = sqlx::query(
            "UPDATE accounts SET available_balance = $1, held_balance = $2, \
             version = version + 1, updated_at = NOW() \
             WHERE id = $3 AND version = $4",
        )
        .bind(next.available)
        .bind(next.held)
        .bind(account_id)
        .bind(account.version)
        .execute(pool)
        .await
        .map_err(map_check_violation)?;

        if result.rows_affected() == 1 {
            debug!(
                account_id,
                effect = effect.as_str(),
                %amount,
                version = account.version + 1,
                "Balance effect applied"
            );
            return fetch_account(pool, account_id).await;
        }

        warn!(account_id, attempt, "Balance CAS lost, retrying");
    }

    Err(LedgerError::OptimisticConflict(account_id))
}

/// Decrease the available balance.
pub async fn debit(pool: &PgPool, account_id: i64, amount: Decimal) -> Result<Account> {
    apply_effect(pool, account_id, BalanceEffect::Debit, amount).await
}

/// Increase the available balance.
pub async fn credit(pool: &PgPool, account_id: i64, amount: Decimal) -> Result<Account> {
    apply_effect(pool, account_id, BalanceEffect::Credit, amount).await
}

/// Move funds from available to held.
pub async fn hold(pool: &PgPool, account_id: i64, amount: Decimal) -> Result<Account> {
    apply_effect(pool, account_id, BalanceEffect::Hold, amount).await
}

/// Move held funds back to available.
pub async fn release(pool: &PgPool, account_id: i64, amount: Decimal) -> Result<Account> {
    apply_effect(pool, account_id, BalanceEffect::Release, amount).await
}

/// Remove held funds for good.
pub async fn capture(pool: &PgPool, account_id: i64, amount: Decimal) -> Result<Account> {
    apply_effect(pool, account_id, BalanceEffect::Capture, amount).await
}

/// A CHECK constraint firing means the in-memory guard was bypassed; that is
/// a programmer bug, surfaced as Internal.
fn map_check_violation(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23514") {
            return LedgerError::Internal(format!("Balance CHECK violated: {}", db_err));
        }
    }
    LedgerError::Database(err)
}
