//! Settlement repository

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::Settlement;
use settle_domain::states::SettlementStatus;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    id: i64,
    external_id: Uuid,
    payment_id: Option<i64>,
    merchant_account_id: i64,
    amount: Decimal,
    status: String,
    tx_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SettlementRow {
    fn into_settlement(self) -> Result<Settlement, StoreError> {
        let status = SettlementStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown settlement status: {}", self.status))
        })?;

        Ok(Settlement {
            id: self.id,
            external_id: self.external_id,
            payment_id: self.payment_id,
            merchant_account_id: self.merchant_account_id,
            amount: self.amount,
            status,
            tx_hash: self.tx_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str =
    "id, external_id, payment_id, merchant_account_id, amount, status, tx_hash, \
     created_at, updated_at";

pub async fn create_settlement<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    payment_id: Option<i64>,
    merchant_account_id: i64,
    amount: Decimal,
) -> Result<Settlement, StoreError> {
    let row = sqlx::query_as::<_, SettlementRow>(&format!(
        "INSERT INTO settlements (external_id, payment_id, merchant_account_id, amount) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        COLUMNS
    ))
    .bind(external_id)
    .bind(payment_id)
    .bind(merchant_account_id)
    .bind(amount)
    .fetch_one(executor)
    .await?;

    row.into_settlement()
}

pub async fn get_settlement_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Settlement>, StoreError> {
    let row = sqlx::query_as::<_, SettlementRow>(&format!(
        "SELECT {} FROM settlements WHERE external_id = $1",
        COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(SettlementRow::into_settlement).transpose()
}

pub async fn get_settlement_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Settlement>, StoreError> {
    let row = sqlx::query_as::<_, SettlementRow>(&format!(
        "SELECT {} FROM settlements WHERE id = $1 FOR UPDATE",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(SettlementRow::into_settlement).transpose()
}

pub async fn update_settlement_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: SettlementStatus,
    tx_hash: Option<&str>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE settlements SET status = $1, tx_hash = COALESCE($2, tx_hash), \
         updated_at = NOW() WHERE id = $3",
    )
    .bind(status.as_str())
    .bind(tx_hash)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
