//! Application error taxonomy.
//!
//! Every component boundary returns typed errors; this module folds them
//! into the stable codes the HTTP layer renders. Unknown errors coerce to
//! `Internal` with a generic message; the original error is logged with the
//! request id at the call site. Signature-failure details never reach the
//! client (oracle defense): only `NonceReused` is surfaced distinctly, the
//! rest collapse to `WalletVerificationFailed`.

use axum::http::StatusCode;
use rust_decimal::Decimal;
use settle_domain::value_objects::DomainError;
use settle_kv::KvError;
use settle_ledger::types::LedgerError;
use settle_store::{StoreError, TxError};
use settle_verify::VerifyError;
use thiserror::Error;

/// Daemon-level errors with stable codes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{resource} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("Request with this idempotency key already processed")]
    IdempotencyConflict { key: String },

    #[error("Available balance {available} is less than requested {requested}")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    #[error("Available stock {available} is less than requested {requested}")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("Cannot apply {event} in state {current}")]
    InvalidStateTransition { current: String, event: String },

    #[error("Payment authorization has expired")]
    PaymentExpired { payment_id: i64 },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Wallet verification failed")]
    WalletVerificationFailed,

    #[error("Nonce already used")]
    NonceReused,

    #[error("Failed to acquire lock for {resource}")]
    LockNotAcquired { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database operation failed")]
    Db(String),

    #[error("Blockchain RPC operation failed")]
    Chain(String),

    #[error("Transaction confirmation timeout")]
    ChainTimeout(String),
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        AppError::NotFound { resource, id: id.to_string() }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            AppError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            AppError::PaymentExpired { .. } => "PAYMENT_EXPIRED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::WalletVerificationFailed => "WALLET_VERIFICATION_FAILED",
            AppError::NonceReused => "NONCE_REUSED",
            AppError::LockNotAcquired { .. } => "LOCK_ACQUISITION_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Db(_) => "DB_ERROR",
            AppError::Chain(_) => "CHAIN_RPC_ERROR",
            AppError::ChainTimeout(_) => "CHAIN_CONFIRMATION_TIMEOUT",
        }
    }

    /// HTTP status mapping.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidStateTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PaymentExpired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::WalletVerificationFailed => StatusCode::BAD_REQUEST,
            AppError::NonceReused => StatusCode::BAD_REQUEST,
            AppError::LockNotAcquired { .. } => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Chain(_) => StatusCode::BAD_GATEWAY,
            AppError::ChainTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Structured details for the error envelope, where useful.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::NotFound { resource, id } => {
                Some(serde_json::json!({ "resource": resource, "id": id }))
            }
            AppError::IdempotencyConflict { key } => {
                Some(serde_json::json!({ "idempotency_key": key }))
            }
            AppError::InsufficientBalance { available, requested } => Some(serde_json::json!({
                "available": available.to_string(),
                "requested": requested.to_string(),
            })),
            AppError::InsufficientStock { available, requested } => {
                Some(serde_json::json!({ "available": available, "requested": requested }))
            }
            AppError::InvalidStateTransition { current, event } => {
                Some(serde_json::json!({ "current_state": current, "event": event }))
            }
            AppError::PaymentExpired { payment_id } => {
                Some(serde_json::json!({ "payment_id": payment_id }))
            }
            AppError::LockNotAcquired { resource } => {
                Some(serde_json::json!({ "resource": resource }))
            }
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

// =============================================================================
// Conversions from component errors
// =============================================================================

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStateTransition { current, event } => {
                AppError::InvalidStateTransition { current, event }
            }
            other => AppError::InvalidInput(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity_type, id } => AppError::NotFound {
                resource: "entity",
                id: format!("{}:{}", entity_type, id),
            },
            StoreError::Duplicate { entity_type, id } => {
                AppError::Conflict(format!("{} already exists: {}", entity_type, id))
            }
            StoreError::InsufficientStock { available, requested } => {
                AppError::InsufficientStock { available, requested }
            }
            StoreError::OptimisticConflict { entity_type, id } => {
                AppError::Conflict(format!("Concurrent update on {} {}, retry", entity_type, id))
            }
            StoreError::InvalidState { message } => AppError::Internal(message),
            StoreError::Serialization(message) => AppError::Internal(message),
            StoreError::Database(message) => AppError::Db(message),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unbalanced { .. } => AppError::InvalidInput(err.to_string()),
            LedgerError::InsufficientBalance { available, requested } => {
                AppError::InsufficientBalance { available, requested }
            }
            LedgerError::InsufficientHold { .. } => AppError::Internal(err.to_string()),
            LedgerError::OptimisticConflict(id) => {
                AppError::Conflict(format!("Concurrent update on account {}, retry", id))
            }
            LedgerError::AccountClosed(id) => {
                AppError::Conflict(format!("Account {} is closed", id))
            }
            LedgerError::AccountNotFound(id) => AppError::not_found("account", id),
            LedgerError::Internal(message) => AppError::Internal(message),
            LedgerError::Domain(domain) => domain.into(),
            LedgerError::Database(db) => AppError::Db(db.to_string()),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NonceReused => AppError::NonceReused,
            VerifyError::Store(message) => AppError::Internal(message),
            // Everything else collapses to the generic client-facing failure.
            _ => AppError::WalletVerificationFailed,
        }
    }
}

impl From<KvError> for AppError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NonceReused => AppError::NonceReused,
            KvError::LockNotAcquired { resource } => AppError::LockNotAcquired { resource },
            KvError::LockNotHeld { resource } => {
                AppError::Internal(format!("Lock for {} lost before release", resource))
            }
            KvError::Backend(message) => AppError::Internal(message),
        }
    }
}

impl From<settle_exec::ExecError> for AppError {
    fn from(err: settle_exec::ExecError) -> Self {
        match err {
            settle_exec::ExecError::ChainTimeout(tx) => AppError::ChainTimeout(tx),
            settle_exec::ExecError::Chain(message) => AppError::Chain(message),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<TxError<AppError>> for AppError {
    fn from(err: TxError<AppError>) -> Self {
        match err {
            TxError::App(inner) => inner,
            TxError::Begin(db) | TxError::Commit(db) => AppError::Db(db.to_string()),
            TxError::RollbackFailed { original, rollback } => AppError::Db(format!(
                "Rollback failed: {} (original error: {})",
                rollback, original
            )),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Db(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_codes_and_statuses() {
        let cases: Vec<(AppError, &str, StatusCode)> = vec![
            (AppError::InvalidInput("x".into()), "INVALID_INPUT", StatusCode::BAD_REQUEST),
            (AppError::not_found("payment", 7), "NOT_FOUND", StatusCode::NOT_FOUND),
            (
                AppError::IdempotencyConflict { key: "k".into() },
                "IDEMPOTENCY_CONFLICT",
                StatusCode::CONFLICT,
            ),
            (
                AppError::InsufficientBalance { available: dec!(1), requested: dec!(2) },
                "INSUFFICIENT_BALANCE",
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::InvalidStateTransition { current: "voided".into(), event: "capture".into() },
                "INVALID_STATE_TRANSITION",
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::NonceReused, "NONCE_REUSED", StatusCode::BAD_REQUEST),
            (
                AppError::WalletVerificationFailed,
                "WALLET_VERIFICATION_FAILED",
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::LockNotAcquired { resource: "inventory:1".into() },
                "LOCK_ACQUISITION_FAILED",
                StatusCode::CONFLICT,
            ),
            (AppError::Db("boom".into()), "DB_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Chain("rpc".into()), "CHAIN_RPC_ERROR", StatusCode::BAD_GATEWAY),
            (
                AppError::ChainTimeout("0xdead".into()),
                "CHAIN_CONFIRMATION_TIMEOUT",
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn test_signature_failures_collapse_to_generic() {
        for err in [
            VerifyError::InvalidSignature,
            VerifyError::AddressMismatch,
            VerifyError::SignatureExpired,
            VerifyError::SignatureFuture,
            VerifyError::InvalidSignatureLength,
        ] {
            let app: AppError = err.into();
            assert!(matches!(app, AppError::WalletVerificationFailed));
            assert_eq!(app.to_string(), "Wallet verification failed");
        }

        // Nonce reuse stays distinct (idempotency signal for clients).
        let app: AppError = VerifyError::NonceReused.into();
        assert!(matches!(app, AppError::NonceReused));
    }

    #[test]
    fn test_tx_error_flattens() {
        let err: AppError = TxError::App(AppError::NonceReused).into();
        assert!(matches!(err, AppError::NonceReused));
    }
}
