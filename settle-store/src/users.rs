//! User repository

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use settle_domain::entities::{KycStatus, User, UserRole, UserStatus};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    external_id: Uuid,
    email: String,
    name: String,
    role: String,
    kyc_status: String,
    kyc_verified_at: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        let role = UserRole::parse(&self.role)
            .ok_or_else(|| StoreError::Serialization(format!("Unknown role: {}", self.role)))?;
        let kyc_status = KycStatus::parse(&self.kyc_status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown kyc status: {}", self.kyc_status))
        })?;
        let status = UserStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown user status: {}", self.status))
        })?;

        Ok(User {
            id: self.id,
            external_id: self.external_id,
            email: self.email,
            name: self.name,
            role,
            kyc_status,
            kyc_verified_at: self.kyc_verified_at,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

const COLUMNS: &str = "id, external_id, email, name, role, kyc_status, kyc_verified_at, \
                       status, created_at, updated_at, deleted_at";

/// Insert a user. A duplicate email among non-deleted rows surfaces as
/// `Duplicate`.
pub async fn create_user<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
    email: &str,
    name: &str,
    role: UserRole,
) -> Result<User, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (external_id, email, name, role) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        COLUMNS
    ))
    .bind(external_id)
    .bind(email)
    .bind(name)
    .bind(role.as_str())
    .fetch_one(executor)
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            StoreError::duplicate("user", email)
        } else {
            err.into()
        }
    })?;

    row.into_user()
}

pub async fn get_user_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(UserRow::into_user).transpose()
}

/// External lookups never return deleted users.
pub async fn get_user_by_external_id<'e, E: PgExecutor<'e>>(
    executor: E,
    external_id: Uuid,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE external_id = $1 AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.map(UserRow::into_user).transpose()
}

/// Row-locked read used before wallet primary changes.
pub async fn get_user_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(UserRow::into_user).transpose()
}

/// Paginated listing with optional role and KYC filters.
pub async fn list_users<'e, E: PgExecutor<'e>>(
    executor: E,
    role: Option<UserRole>,
    kyc_status: Option<KycStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<User>, StoreError> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR role = $1) \
           AND ($2::text IS NULL OR kyc_status = $2) \
         ORDER BY id LIMIT $3 OFFSET $4",
        COLUMNS
    ))
    .bind(role.map(|r| r.as_str()))
    .bind(kyc_status.map(|k| k.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(UserRow::into_user).collect()
}

pub async fn update_user_name<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    name: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET name = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(name)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_user_role<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    role: UserRole,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(role.as_str())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn set_user_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: UserStatus,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET status = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(status.as_str())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Soft delete: terminal. Email uniqueness frees up through the partial index.
pub async fn soft_delete_user<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET status = 'deleted', deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Persist a KYC decision. `kyc_verified_at` is only written on the first
/// transition into Verified (COALESCE keeps the original timestamp).
pub async fn update_kyc_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: KycStatus,
) -> Result<u64, StoreError> {
    let result = if status == KycStatus::Verified {
        sqlx::query(
            "UPDATE users SET kyc_status = $1, \
             kyc_verified_at = COALESCE(kyc_verified_at, NOW()), updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(executor)
        .await?
    } else {
        sqlx::query(
            "UPDATE users SET kyc_status = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(executor)
        .await?
    };

    Ok(result.rows_affected())
}
