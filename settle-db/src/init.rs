//! Minimal data initialization.
//!
//! Seeds the system wallets (one per role) and the operator-owned accounts
//! (escrow + fee) the payment flows depend on. Idempotent via
//! INSERT ... ON CONFLICT DO NOTHING.

use settle_domain::entities::SystemWalletRole;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::Result;

/// Seed system wallets and the escrow/fee accounts.
///
/// Returns (escrow_account_id, fee_account_id).
pub async fn init_system_data(pool: &PgPool) -> Result<(i64, i64)> {
    let mut tx = pool.begin().await?;

    // One system wallet per role. Addresses are placeholders until the
    // operator rotates in real ones.
    for (index, role) in SystemWalletRole::all().iter().enumerate() {
        let address = format!("0x{:040x}", index + 1);
        sqlx::query(
            "INSERT INTO system_wallets (role, address) VALUES ($1, $2) \
             ON CONFLICT (role) DO NOTHING",
        )
        .bind(role.as_str())
        .bind(&address)
        .execute(&mut *tx)
        .await?;
    }

    let escrow_id = ensure_account(&mut tx, "escrow").await?;
    let fee_id = ensure_account(&mut tx, "system").await?;

    tx.commit().await?;

    info!(escrow_id, fee_id, "System data initialized");
    Ok((escrow_id, fee_id))
}

async fn ensure_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_type: &str,
) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM accounts WHERE account_type = $1 AND owner_id IS NULL \
         ORDER BY id LIMIT 1",
    )
    .bind(account_type)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO accounts (external_id, account_type) VALUES ($1, $2) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(account_type)
    .fetch_one(&mut **tx)
    .await?;

    info!(account_type, id, "Created system account");
    Ok(id)
}
