//! Stub adapters for tests and development.

use crate::error::ExecError;
use crate::ports::{ChainClient, ChainReceipt, NotificationSender, TransferRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Chain client that succeeds immediately, optionally failing the first N
/// calls (for retry-path tests).
pub struct StubChainClient {
    fail_first: AtomicU32,
    submitted: Mutex<Vec<TransferRequest>>,
}

impl StubChainClient {
    pub fn new() -> Self {
        Self { fail_first: AtomicU32::new(0), submitted: Mutex::new(Vec::new()) }
    }

    /// Fail the next `n` submissions with a transient chain error.
    pub fn fail_next(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    /// Transfers that went through (test observability).
    pub fn submitted(&self) -> Vec<TransferRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Default for StubChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for StubChainClient {
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<ChainReceipt, ExecError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(ExecError::Chain("stub: transient RPC failure".to_string()));
        }

        self.submitted.lock().unwrap().push(request.clone());

        Ok(ChainReceipt {
            tx_hash: format!("0x{}", Uuid::new_v4().simple()),
            confirmations: 3,
            confirmed_at: Utc::now(),
        })
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        Ok(())
    }
}

/// Notifier that records every send.
pub struct StubNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl StubNotifier {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for StubNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for StubNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        reference: &str,
    ) -> Result<(), ExecError> {
        let mut sent = self.sent.lock().unwrap();

        // Duplicate-safe: a reference is recorded once.
        if sent.iter().any(|(_, _, r)| r == reference) {
            return Ok(());
        }

        sent.push((recipient.to_string(), subject.to_string(), reference.to_string()));
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> TransferRequest {
        TransferRequest {
            to_address: "0xabc0000000000000000000000000000000000001".to_string(),
            amount: dec!(97),
            reference: "settlement:1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stub_chain_succeeds_after_configured_failures() {
        let chain = StubChainClient::new();
        chain.fail_next(2);

        assert!(chain.submit_transfer(&request()).await.is_err());
        assert!(chain.submit_transfer(&request()).await.is_err());

        let receipt = chain.submit_transfer(&request()).await.unwrap();
        assert!(receipt.tx_hash.starts_with("0x"));
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_stub_notifier_is_duplicate_safe() {
        let notifier = StubNotifier::new();
        notifier.send("ops@example.com", "payout", "settlement:1").await.unwrap();
        notifier.send("ops@example.com", "payout", "settlement:1").await.unwrap();

        assert_eq!(notifier.sent().len(), 1);
    }
}
