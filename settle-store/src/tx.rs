//! Unit-of-Work Runner
//!
//! A scoped database transaction: begin, hand the transactional handle to
//! the closure, commit on success, roll back on error. This is the only
//! place commit/rollback policy is enforced; no business logic lives here.
//!
//! A panic inside the closure unwinds through the `Transaction` guard,
//! which rolls back on drop before the panic propagates.

use sqlx::{PgPool, Postgres, Transaction};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future type returned by unit-of-work closures.
pub type TxFuture<'t, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 't>>;

/// Outcome of a unit of work, keeping the application error typed.
#[derive(Debug, thiserror::Error)]
pub enum TxError<E: fmt::Debug + fmt::Display> {
    /// The closure failed; the transaction was rolled back cleanly.
    #[error("{0}")]
    App(E),

    /// Could not open the transaction.
    #[error("Begin transaction: {0}")]
    Begin(sqlx::Error),

    /// The closure succeeded but the commit failed.
    #[error("Commit transaction: {0}")]
    Commit(sqlx::Error),

    /// Both the closure and the rollback failed; neither error is lost.
    #[error("Rollback failed: {rollback} (original error: {original})")]
    RollbackFailed {
        /// The error the closure returned
        original: E,
        /// The error the rollback itself produced
        rollback: sqlx::Error,
    },
}

/// Manages database transactions for the service layer.
///
/// Usage:
///
/// ```rust,no_run
/// # use settle_store::tx::TxRunner;
/// # async fn example(runner: &TxRunner) -> Result<(), Box<dyn std::error::Error>> {
/// let order_id: i64 = runner
///     .run(|tx| {
///         Box::pin(async move {
///             let id: i64 = sqlx::query_scalar("SELECT 1")
///                 .fetch_one(&mut **tx)
///                 .await
///                 .map_err(settle_store::StoreError::from)?;
///             Ok::<_, settle_store::StoreError>(id)
///         })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TxRunner {
    pool: PgPool,
}

impl TxRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Execute `f` within a transaction. Commits when `f` returns `Ok`,
    /// rolls back otherwise.
    pub async fn run<T, E, F>(&self, f: F) -> Result<T, TxError<E>>
    where
        E: fmt::Debug + fmt::Display,
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxFuture<'t, T, E>,
    {
        let mut tx = self.pool.begin().await.map_err(TxError::Begin)?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await.map_err(TxError::Commit)?;
                Ok(value)
            }
            Err(original) => match tx.rollback().await {
                Ok(()) => Err(TxError::App(original)),
                Err(rollback) => Err(TxError::RollbackFailed { original, rollback }),
            },
        }
    }

    /// Non-transactional handle for reads.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_tx_error_preserves_both_errors() {
        let err: TxError<StoreError> = TxError::RollbackFailed {
            original: StoreError::not_found("order", 7),
            rollback: sqlx::Error::PoolClosed,
        };

        let rendered = err.to_string();
        assert!(rendered.contains("Rollback failed"));
        assert!(rendered.contains("order"));
    }

    #[test]
    fn test_app_error_renders_transparently() {
        let err: TxError<StoreError> = TxError::App(StoreError::not_found("user", 1));
        assert_eq!(err.to_string(), "Entity not found: user with id 1");
    }
}
