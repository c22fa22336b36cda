//! Key-value layer errors

use thiserror::Error;

/// Errors from the nonce store and distributed lock
#[derive(Debug, Error)]
pub enum KvError {
    /// Nonce already reserved or used (at-most-once violation)
    #[error("Nonce already used or reserved")]
    NonceReused,

    /// Lock held by someone else
    #[error("Failed to acquire lock for {resource}")]
    LockNotAcquired {
        /// Resource the caller tried to lock
        resource: String,
    },

    /// Release or extend attempted by a non-holder; the key is untouched
    #[error("Lock for {resource} is not held by this owner")]
    LockNotHeld {
        /// Resource whose lock was not held
        resource: String,
    },

    /// Backend (Redis) failure
    #[error("Key-value backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}
