//! Deposit and withdrawal repository

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::{Deposit, Withdrawal};
use settle_domain::states::{DepositStatus, WithdrawalStatus};
use sqlx::PgExecutor;
use uuid::Uuid;

// =============================================================================
// Deposits
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DepositRow {
    id: i64,
    external_id: Uuid,
    account_id: i64,
    from_address: String,
    tx_hash: String,
    amount: Decimal,
    confirmations: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepositRow {
    fn into_deposit(self) -> Result<Deposit, StoreError> {
        let status = DepositStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown deposit status: {}", self.status))
        })?;

        Ok(Deposit {
            id: self.id,
            external_id: self.external_id,
            account_id: self.account_id,
            from_address: self.from_address,
            tx_hash: self.tx_hash,
            amount: self.amount,
            confirmations: self.confirmations,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DEPOSIT_COLUMNS: &str = "id, external_id, account_id, from_address, tx_hash, amount, \
                               confirmations, status, created_at, updated_at";

/// Record a detected on-chain transfer. The unique tx_hash makes repeated
/// detection idempotent at the storage level (`Duplicate`).
pub async fn create_deposit<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    account_id: i64,
    from_address: &str,
    tx_hash: &str,
    amount: Decimal,
) -> Result<Deposit, StoreError> {
    let row = sqlx::query_as::<_, DepositRow>(&format!(
        "INSERT INTO deposits (external_id, account_id, from_address, tx_hash, amount) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        DEPOSIT_COLUMNS
    ))
    .bind(external_id)
    .bind(account_id)
    .bind(from_address)
    .bind(tx_hash)
    .bind(amount)
    .fetch_one(executor)
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            StoreError::duplicate("deposit", tx_hash)
        } else {
            err.into()
        }
    })?;

    row.into_deposit()
}

pub async fn get_deposit_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Deposit>, StoreError> {
    let row = sqlx::query_as::<_, DepositRow>(&format!(
        "SELECT {} FROM deposits WHERE external_id = $1",
        DEPOSIT_COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(DepositRow::into_deposit).transpose()
}

pub async fn get_deposit_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Deposit>, StoreError> {
    let row = sqlx::query_as::<_, DepositRow>(&format!(
        "SELECT {} FROM deposits WHERE id = $1 FOR UPDATE",
        DEPOSIT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(DepositRow::into_deposit).transpose()
}

pub async fn update_deposit_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: DepositStatus,
    confirmations: i32,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE deposits SET status = $1, confirmations = $2, updated_at = NOW() WHERE id = $3",
    )
    .bind(status.as_str())
    .bind(confirmations)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Withdrawals
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct WithdrawalRow {
    id: i64,
    external_id: Uuid,
    account_id: i64,
    to_address: String,
    amount: Decimal,
    status: String,
    tx_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WithdrawalRow {
    fn into_withdrawal(self) -> Result<Withdrawal, StoreError> {
        let status = WithdrawalStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown withdrawal status: {}", self.status))
        })?;

        Ok(Withdrawal {
            id: self.id,
            external_id: self.external_id,
            account_id: self.account_id,
            to_address: self.to_address,
            amount: self.amount,
            status,
            tx_hash: self.tx_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const WITHDRAWAL_COLUMNS: &str =
    "id, external_id, account_id, to_address, amount, status, tx_hash, created_at, updated_at";

pub async fn create_withdrawal<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    account_id: i64,
    to_address: &str,
    amount: Decimal,
) -> Result<Withdrawal, StoreError> {
    let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
        "INSERT INTO withdrawals (external_id, account_id, to_address, amount) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        WITHDRAWAL_COLUMNS
    ))
    .bind(external_id)
    .bind(account_id)
    .bind(to_address)
    .bind(amount)
    .fetch_one(executor)
    .await?;

    row.into_withdrawal()
}

pub async fn get_withdrawal_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Withdrawal>, StoreError> {
    let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
        "SELECT {} FROM withdrawals WHERE external_id = $1",
        WITHDRAWAL_COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(WithdrawalRow::into_withdrawal).transpose()
}

pub async fn get_withdrawal_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Withdrawal>, StoreError> {
    let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
        "SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE",
        WITHDRAWAL_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(WithdrawalRow::into_withdrawal).transpose()
}

pub async fn update_withdrawal_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: WithdrawalStatus,
    tx_hash: Option<&str>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE withdrawals SET status = $1, tx_hash = COALESCE($2, tx_hash), \
         updated_at = NOW() WHERE id = $3",
    )
    .bind(status.as_str())
    .bind(tx_hash)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
