//! Ledger Poster
//!
//! Writes a balanced batch inside the caller's transaction: for each entry
//! in order, lock the account row, apply the balance effect, compute
//! balance_after from the post-state, insert the immutable row. The
//! double-entry invariant is enforced by [`crate::batch::BalancedBatch`]
//! before this module ever runs.

use crate::accounts::{fetch_account_for_update, update_balances_tx};
use crate::balance::Balances;
use crate::batch::BalancedBatch;
use crate::types::{LedgerEntryRow, LedgerError, Result};
use settle_domain::entities::AccountStatus;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Post a balanced batch under the given transaction-group id.
///
/// The caller chooses the group id, unique per logical operation, so a retry
/// of the same operation can be detected by reading the group back.
pub async fn post_batch(
    tx: &mut Transaction<'_, Postgres>,
    group_id: Uuid,
    batch: &BalancedBatch,
) -> Result<Vec<LedgerEntryRow>> {
    let mut rows = Vec::with_capacity(batch.len());

    for entry in batch.entries() {
        // Row lock serializes concurrent groups touching this account.
        let account = fetch_account_for_update(tx, entry.account_id).await?;

        if account.status == AccountStatus::Closed {
            return Err(LedgerError::AccountClosed(entry.account_id));
        }

        let next = Balances::new(account.available_balance, account.held_balance)
            .apply(entry.effect, entry.amount)?;

        update_balances_tx(tx, account.id, account.version, next).await?;

        // balance_after snapshots the available balance once the effect lands.
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            "INSERT INTO ledger_entries \
             (transaction_group_id, account_id, side, amount, balance_after, \
              reference_type, reference_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, transaction_group_id, account_id, side, amount, balance_after, \
                       reference_type, reference_id, description, created_at",
        )
        .bind(group_id)
        .bind(entry.account_id)
        .bind(entry.side.as_str())
        .bind(entry.amount)
        .bind(next.available)
        .bind(&entry.reference_type)
        .bind(entry.reference_id)
        .bind(&entry.description)
        .fetch_one(&mut **tx)
        .await?;

        rows.push(row);
    }

    debug!(%group_id, entries = rows.len(), "Ledger batch posted");
    Ok(rows)
}

/// All rows of one transaction group, in insertion order.
pub async fn entries_for_group(pool: &PgPool, group_id: Uuid) -> Result<Vec<LedgerEntryRow>> {
    let rows = sqlx::query_as::<_, LedgerEntryRow>(
        "SELECT id, transaction_group_id, account_id, side, amount, balance_after, \
                reference_type, reference_id, description, created_at \
         FROM ledger_entries WHERE transaction_group_id = $1 ORDER BY id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Recent rows for one account, newest first.
pub async fn entries_for_account(
    pool: &PgPool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<LedgerEntryRow>> {
    let rows = sqlx::query_as::<_, LedgerEntryRow>(
        "SELECT id, transaction_group_id, account_id, side, amount, balance_after, \
                reference_type, reference_id, description, created_at \
         FROM ledger_entries WHERE account_id = $1 ORDER BY id DESC LIMIT $2",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
