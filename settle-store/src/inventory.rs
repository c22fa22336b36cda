//! Product and inventory repository
//!
//! Inventory counters are mutated under optimistic versioning with the same
//! read-then-CAS loop as account balances. Long critical sections
//! additionally hold the distributed lock `inventory:<product id>`; the
//! version check stays on regardless (defense in depth).

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::Product;
use sqlx::{PgExecutor, PgPool};
use tracing::warn;
use uuid::Uuid;

/// Read-then-CAS attempts before giving up.
pub const CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InventoryRow {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub reserved: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRow {
    /// Units free to reserve.
    pub fn available(&self) -> i32 {
        self.quantity - self.reserved
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    external_id: Uuid,
    seller_id: i64,
    name: String,
    description: String,
    price: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            external_id: row.external_id,
            seller_id: row.seller_id,
            name: row.name,
            description: row.description,
            price: row.price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn create_product<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    seller_id: i64,
    name: &str,
    description: &str,
    price: Decimal,
) -> Result<Product, StoreError> {
    let row = sqlx::query_as::<_, ProductRow>(
        "INSERT INTO products (external_id, seller_id, name, description, price) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, external_id, seller_id, name, description, price, created_at, updated_at",
    )
    .bind(external_id)
    .bind(seller_id)
    .bind(name)
    .bind(description)
    .bind(price)
    .fetch_one(executor)
    .await?;

    Ok(row.into())
}

pub async fn get_product_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<Product>, StoreError> {
    let row = sqlx::query_as::<_, ProductRow>(
        "SELECT id, external_id, seller_id, name, description, price, created_at, updated_at \
         FROM products WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}

/// Create or top up the stock row for a product.
pub async fn upsert_inventory<'e, E: PgExecutor<'e>>(
    executor: E,
    product_id: i64,
    quantity: i32,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO inventory (product_id, quantity) VALUES ($1, $2) \
         ON CONFLICT (product_id) \
         DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity, \
                       version = inventory.version + 1, updated_at = NOW()",
    )
    .bind(product_id)
    .bind(quantity)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get_inventory<'e, E: PgExecutor<'e>>(
    executor: E,
    product_id: i64,
) -> Result<Option<InventoryRow>, StoreError> {
    let row = sqlx::query_as::<_, InventoryRow>(
        "SELECT id, product_id, quantity, reserved, version, updated_at \
         FROM inventory WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// What a CAS mutation does to the (quantity, reserved) counters.
#[derive(Debug, Clone, Copy)]
enum StockOp {
    Reserve(i32),
    ReleaseReservation(i32),
    DeductReserved(i32),
}

/// Reserve units for an order. Fails with `InsufficientStock` when fewer
/// than `units` are free.
pub async fn reserve_stock(pool: &PgPool, product_id: i64, units: i32) -> Result<(), StoreError> {
    mutate_stock(pool, product_id, StockOp::Reserve(units)).await
}

/// Return previously reserved units (order cancelled).
pub async fn release_reservation(
    pool: &PgPool,
    product_id: i64,
    units: i32,
) -> Result<(), StoreError> {
    mutate_stock(pool, product_id, StockOp::ReleaseReservation(units)).await
}

/// Consume reserved units for good (order shipped).
pub async fn deduct_reserved(pool: &PgPool, product_id: i64, units: i32) -> Result<(), StoreError> {
    mutate_stock(pool, product_id, StockOp::DeductReserved(units)).await
}

async fn mutate_stock(pool: &PgPool, product_id: i64, op: StockOp) -> Result<(), StoreError> {
    for attempt in 1..=CAS_ATTEMPTS {
        let row = get_inventory(pool, product_id)
            .await?
            .ok_or_else(|| StoreError::not_found("inventory", product_id))?;

        let (quantity, reserved) = match op {
            StockOp::Reserve(units) => {
                if row.available() < units {
                    return Err(StoreError::InsufficientStock {
                        available: row.available(),
                        requested: units,
                    });
                }
                (row.quantity, row.reserved + units)
            }
            StockOp::ReleaseReservation(units) => {
                if row.reserved < units {
                    return Err(StoreError::invalid_state(format!(
                        "Cannot release {} units, only {} reserved",
                        units, row.reserved
                    )));
                }
                (row.quantity, row.reserved - units)
            }
            StockOp::DeductReserved(units) => {
                if row.reserved < units {
                    return Err(StoreError::invalid_state(format!(
                        "Cannot deduct {} units, only {} reserved",
                        units, row.reserved
                    )));
                }
                (row.quantity - units, row.reserved - units)
            }
        };

        let result = sqlx::query(
            "UPDATE inventory SET quantity = $1, reserved = $2, \
             version = version + 1, updated_at = NOW() \
             WHERE product_id = $3 AND version = $4",
        )
        .bind(quantity)
        .bind(reserved)
        .bind(product_id)
        .bind(row.version)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        warn!(product_id, attempt, "Inventory CAS lost, retrying");
    }

    Err(StoreError::OptimisticConflict { entity_type: "inventory".to_string(), id: product_id })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_units() {
        let row = InventoryRow {
            id: 1,
            product_id: 1,
            quantity: 10,
            reserved: 4,
            version: 0,
            updated_at: Utc::now(),
        };
        assert_eq!(row.available(), 6);
    }
}
