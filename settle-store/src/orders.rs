//! Order repository

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::{Order, OrderItem};
use settle_domain::states::OrderStatus;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    external_id: Uuid,
    buyer_id: i64,
    seller_id: i64,
    status: String,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, StoreError> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown order status: {}", self.status))
        })?;

        Ok(Order {
            id: self.id,
            external_id: self.external_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            status,
            total_amount: self.total_amount,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, external_id, buyer_id, seller_id, status, total_amount, \
                       created_at, updated_at";

/// Insert the order header. total_amount is immutable from here on.
pub async fn create_order<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    buyer_id: i64,
    seller_id: i64,
    total_amount: Decimal,
) -> Result<Order, StoreError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "INSERT INTO orders (external_id, buyer_id, seller_id, total_amount) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        COLUMNS
    ))
    .bind(external_id)
    .bind(buyer_id)
    .bind(seller_id)
    .bind(total_amount)
    .fetch_one(executor)
    .await?;

    row.into_order()
}

pub async fn insert_order_item<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
    product_id: i64,
    quantity: i32,
    unit_price: Decimal,
) -> Result<OrderItem, StoreError> {
    let row = sqlx::query_as::<_, (i64,)>(
        "INSERT INTO order_items (order_id, product_id, quantity, unit_price) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(order_id)
    .bind(product_id)
    .bind(quantity)
    .bind(unit_price)
    .fetch_one(executor)
    .await?;

    Ok(OrderItem { id: row.0, order_id, product_id, quantity, unit_price })
}

pub async fn get_order_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE external_id = $1",
        COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(OrderRow::into_order).transpose()
}

/// Row-locked read taken at the start of every order transition.
pub async fn get_order_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(OrderRow::into_order).transpose()
}

pub async fn update_order_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: OrderStatus,
) -> Result<u64, StoreError> {
    let result =
        sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(executor)
            .await?;

    Ok(result.rows_affected())
}

pub async fn items_for_order<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<Vec<OrderItem>, StoreError> {
    #[derive(sqlx::FromRow)]
    struct ItemRow {
        id: i64,
        order_id: i64,
        product_id: i64,
        quantity: i32,
        unit_price: Decimal,
    }

    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, order_id, product_id, quantity, unit_price \
         FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| OrderItem {
            id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            quantity: r.quantity,
            unit_price: r.unit_price,
        })
        .collect())
}
