//! Audit log repository
//!
//! Append-only; rows are never updated or deleted.

use crate::error::StoreError;
use sqlx::PgExecutor;

/// Append one audit row, usually inside the same unit of work as the
/// mutation it records.
#[allow(clippy::too_many_arguments)]
pub async fn append<'e, E: PgExecutor<'e>>(
    executor: E,
    actor: &str,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
    request_id: Option<&str>,
) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO audit_logs (actor, action, resource_type, resource_id, before, after, request_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(actor)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(before)
    .bind(after)
    .bind(request_id)
    .fetch_one(executor)
    .await?;

    Ok(id)
}
