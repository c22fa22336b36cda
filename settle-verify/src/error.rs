//! Verification errors

use settle_kv::KvError;
use thiserror::Error;

/// Errors from wallet ownership verification.
///
/// The precise variant is for logs and tests; user-facing surfaces collapse
/// these to a generic message to avoid acting as a signature oracle.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Invalid wallet address")]
    InvalidAddress,

    #[error("Signature must be 65 bytes")]
    InvalidSignatureLength,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature timestamp expired")]
    SignatureExpired,

    #[error("Signature timestamp is in the future")]
    SignatureFuture,

    #[error("Recovered address does not match")]
    AddressMismatch,

    #[error("Nonce already used or reserved")]
    NonceReused,

    #[error("Nonce store error: {0}")]
    Store(String),
}

impl From<KvError> for VerifyError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NonceReused => VerifyError::NonceReused,
            other => VerifyError::Store(other.to_string()),
        }
    }
}
