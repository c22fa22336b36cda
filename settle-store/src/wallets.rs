//! Wallet repository
//!
//! Invariants the storage layer backs with partial unique indexes:
//! unique active address, at most one primary per user. The conditional
//! UPDATE guards (verified, not deleted, not primary) make the service
//! checks race-safe.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use settle_domain::entities::Wallet;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: i64,
    external_id: Uuid,
    user_id: i64,
    address: String,
    label: Option<String>,
    is_primary: bool,
    is_verified: bool,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            id: row.id,
            external_id: row.external_id,
            user_id: row.user_id,
            address: row.address,
            label: row.label,
            is_primary: row.is_primary,
            is_verified: row.is_verified,
            verified_at: row.verified_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

const COLUMNS: &str = "id, external_id, user_id, address, label, is_primary, is_verified, \
                       verified_at, created_at, updated_at, deleted_at";

/// Insert a wallet. A duplicate active address surfaces as `Duplicate`.
pub async fn create_wallet<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    user_id: i64,
    address: &str,
    label: Option<&str>,
) -> Result<Wallet, StoreError> {
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "INSERT INTO wallets (external_id, user_id, address, label) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        COLUMNS
    ))
    .bind(external_id)
    .bind(user_id)
    .bind(address)
    .bind(label)
    .fetch_one(executor)
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            StoreError::duplicate("wallet", address)
        } else {
            err.into()
        }
    })?;

    Ok(row.into())
}

pub async fn get_wallet_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Wallet>, StoreError> {
    let row =
        sqlx::query_as::<_, WalletRow>(&format!("SELECT {} FROM wallets WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(executor)
            .await?;

    Ok(row.map(Into::into))
}

/// Ownership-scoped lookup. Deleted wallets are excluded unless
/// `include_deleted` (delete idempotency needs to see them).
pub async fn get_wallet_by_external_id_and_user<'e, E: PgExecutor<'e>>(
    executor: E,
    wallet_external_id: Uuid,
    user_id: i64,
    include_deleted: bool,
) -> Result<Option<Wallet>, StoreError> {
    let filter = if include_deleted { "" } else { " AND deleted_at IS NULL" };
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE external_id = $1 AND user_id = $2{}",
        COLUMNS, filter
    ))
    .bind(wallet_external_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn list_wallets_by_user<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Vec<Wallet>, StoreError> {
    let rows = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE user_id = $1 AND deleted_at IS NULL ORDER BY id",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get_wallet_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    user_id: i64,
) -> Result<Option<Wallet>, StoreError> {
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE id = $1 AND user_id = $2 FOR UPDATE",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn update_wallet_label<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    user_id: i64,
    label: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE wallets SET label = $1, updated_at = NOW() \
         WHERE id = $2 AND user_id = $3 AND deleted_at IS NULL",
    )
    .bind(label)
    .bind(id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Flip is_verified once; 0 rows affected means it already was verified.
pub async fn mark_wallet_verified<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    user_id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE wallets SET is_verified = TRUE, verified_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND is_verified = FALSE AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_primary_wallet<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Option<Wallet>, StoreError> {
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE user_id = $1 AND is_primary AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn clear_primary_wallet<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE wallets SET is_primary = FALSE, updated_at = NOW() \
         WHERE user_id = $1 AND is_primary",
    )
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Primary requires verified; the WHERE clause enforces it race-free.
pub async fn set_wallet_primary<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    user_id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE wallets SET is_primary = TRUE, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND is_verified AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Soft delete; refuses primary wallets at the storage level too.
pub async fn soft_delete_wallet<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    user_id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE wallets SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND NOT is_primary AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Point the owner's account at its new primary wallet. Best-effort caller
/// side; this just issues the update.
pub async fn update_account_primary_wallet<'e, E: PgExecutor<'e>>(
    executor: E,
    owner_id: i64,
    wallet_id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE accounts SET primary_wallet_id = $1, updated_at = NOW() WHERE owner_id = $2",
    )
    .bind(wallet_id)
    .bind(owner_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
