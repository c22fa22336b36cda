//! Payment repository

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::Payment;
use settle_domain::states::PaymentStatus;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    external_id: Uuid,
    order_id: Option<i64>,
    payer_account_id: i64,
    payee_account_id: i64,
    amount: Decimal,
    fee_amount: Decimal,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    authorized_at: Option<DateTime<Utc>>,
    captured_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, StoreError> {
        let status = PaymentStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown payment status: {}", self.status))
        })?;

        Ok(Payment {
            id: self.id,
            external_id: self.external_id,
            order_id: self.order_id,
            payer_account_id: self.payer_account_id,
            payee_account_id: self.payee_account_id,
            amount: self.amount,
            fee_amount: self.fee_amount,
            status,
            expires_at: self.expires_at,
            authorized_at: self.authorized_at,
            captured_at: self.captured_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, external_id, order_id, payer_account_id, payee_account_id, amount, \
                       fee_amount, status, expires_at, authorized_at, captured_at, \
                       created_at, updated_at";

pub async fn create_payment<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    order_id: Option<i64>,
    payer_account_id: i64,
    payee_account_id: i64,
    amount: Decimal,
    fee_amount: Decimal,
) -> Result<Payment, StoreError> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "INSERT INTO payments \
         (external_id, order_id, payer_account_id, payee_account_id, amount, fee_amount) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        COLUMNS
    ))
    .bind(external_id)
    .bind(order_id)
    .bind(payer_account_id)
    .bind(payee_account_id)
    .bind(amount)
    .bind(fee_amount)
    .fetch_one(executor)
    .await?;

    row.into_payment()
}

pub async fn get_payment_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Payment>, StoreError> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE external_id = $1",
        COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(PaymentRow::into_payment).transpose()
}

/// Row-locked read taken at the start of every payment transition.
pub async fn get_payment_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Payment>, StoreError> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(PaymentRow::into_payment).transpose()
}

/// Authorized: stamp the expiry window alongside the status.
pub async fn mark_authorized<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    expires_at: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE payments SET status = 'authorized', expires_at = $1, \
         authorized_at = NOW(), updated_at = NOW() WHERE id = $2",
    )
    .bind(expires_at)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn mark_captured<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    fee_amount: Decimal,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE payments SET status = 'captured', fee_amount = $1, \
         captured_at = NOW(), updated_at = NOW() WHERE id = $2",
    )
    .bind(fee_amount)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_payment_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: PaymentStatus,
) -> Result<u64, StoreError> {
    let result =
        sqlx::query("UPDATE payments SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(executor)
            .await?;

    Ok(result.rows_affected())
}

/// Authorized payments whose expiry has passed; input for the auto-void pass.
pub async fn list_expired_authorized<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Payment>, StoreError> {
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments \
         WHERE status = 'authorized' AND expires_at IS NOT NULL AND expires_at < $1 \
         ORDER BY expires_at LIMIT $2",
        COLUMNS
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(PaymentRow::into_payment).collect()
}
