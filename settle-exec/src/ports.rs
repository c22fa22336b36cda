//! Port definitions for external services.

use crate::error::ExecError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A token transfer to submit on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Destination address (0x, lower-cased)
    pub to_address: String,
    /// Token amount
    pub amount: Decimal,
    /// Client-side reference for idempotent submission
    pub reference: String,
}

/// Receipt of a confirmed chain transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReceipt {
    pub tx_hash: String,
    pub confirmations: u32,
    pub confirmed_at: DateTime<Utc>,
}

/// Port for chain operations.
///
/// Implementations:
/// - `StubChainClient` - for tests (configurable failures)
/// - a JSON-RPC adapter in deployments
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a transfer and wait for the required confirmations.
    ///
    /// The `reference` in the request makes resubmission idempotent on the
    /// adapter side; the outbox retries rely on that.
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<ChainReceipt, ExecError>;

    /// Check chain connectivity.
    async fn health_check(&self) -> Result<(), ExecError>;
}

/// Port for outward notifications (email, webhook).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification; duplicate-safe by `reference`.
    async fn send(&self, recipient: &str, subject: &str, reference: &str)
        -> Result<(), ExecError>;
}
