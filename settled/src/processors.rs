//! Outbox event processors.
//!
//! Each processor handles one event type pulled off the outbox, bridging to
//! the chain client or the notifier and reporting the result back into the
//! owning aggregate. All of them are duplicate-safe: delivery is
//! at-least-once.

use crate::error::AppError;
use crate::outbox_worker::EventProcessor;
use crate::services::{FundingService, SettlementService};
use async_trait::async_trait;
use settle_domain::events::DomainEvent;
use settle_exec::{ChainClient, NotificationSender, TransferRequest};
use settle_store::OutboxEntry;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

fn decode(entry: &OutboxEntry) -> Result<DomainEvent, AppError> {
    serde_json::from_value(entry.payload.clone())
        .map_err(|err| AppError::internal(format!("Undecodable outbox payload: {}", err)))
}

/// Pays a completed settlement out to the merchant's primary wallet.
pub struct SettlementPayoutProcessor {
    pub pool: PgPool,
    pub chain: Arc<dyn ChainClient>,
    pub settlements: Arc<SettlementService>,
}

#[async_trait]
impl EventProcessor for SettlementPayoutProcessor {
    async fn process(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        let DomainEvent::SettlementExecuted { settlement_id, merchant_account_id, amount, .. } =
            decode(entry)?
        else {
            return Err(AppError::internal(format!(
                "Processor bound to wrong event type: {}",
                entry.event_type
            )));
        };

        // Payout destination is the merchant's primary wallet.
        let address: Option<String> = sqlx::query_scalar(
            "SELECT w.address FROM accounts a \
             JOIN wallets w ON w.id = a.primary_wallet_id \
             WHERE a.id = $1 AND w.deleted_at IS NULL",
        )
        .bind(merchant_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(address) = address else {
            return Err(AppError::internal(format!(
                "Merchant account {} has no primary wallet for payout",
                merchant_account_id
            )));
        };

        let receipt = self
            .chain
            .submit_transfer(&TransferRequest {
                to_address: address,
                amount,
                reference: format!("settlement:{}", settlement_id),
            })
            .await?;

        self.settlements.complete(settlement_id, &receipt.tx_hash).await?;

        info!(settlement_id, tx_hash = %receipt.tx_hash, "Settlement payout confirmed");
        Ok(())
    }
}

/// Submits an approved withdrawal on chain and walks it to Completed.
pub struct WithdrawalSubmitProcessor {
    pub chain: Arc<dyn ChainClient>,
    pub funding: Arc<FundingService>,
}

#[async_trait]
impl EventProcessor for WithdrawalSubmitProcessor {
    async fn process(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        let DomainEvent::WithdrawalApproved { withdrawal_id, to_address, amount, .. } =
            decode(entry)?
        else {
            return Err(AppError::internal(format!(
                "Processor bound to wrong event type: {}",
                entry.event_type
            )));
        };

        let receipt = self
            .chain
            .submit_transfer(&TransferRequest {
                to_address,
                amount,
                reference: format!("withdrawal:{}", withdrawal_id),
            })
            .await?;

        self.funding.mark_withdrawal_submitted(withdrawal_id, &receipt.tx_hash).await?;
        self.funding.complete_withdrawal(withdrawal_id).await?;

        info!(withdrawal_id, tx_hash = %receipt.tx_hash, "Withdrawal submitted and confirmed");
        Ok(())
    }
}

/// Finishes a credited deposit and notifies the owner.
pub struct DepositCreditedProcessor {
    pub notifier: Arc<dyn NotificationSender>,
    pub funding: Arc<FundingService>,
}

#[async_trait]
impl EventProcessor for DepositCreditedProcessor {
    async fn process(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        let DomainEvent::DepositCredited { deposit_id, account_id, tx_hash, .. } = decode(entry)?
        else {
            return Err(AppError::internal(format!(
                "Processor bound to wrong event type: {}",
                entry.event_type
            )));
        };

        self.notifier
            .send(
                &format!("account:{}", account_id),
                "Deposit credited",
                &format!("deposit:{}:{}", deposit_id, tx_hash),
            )
            .await?;

        self.funding.complete_deposit(deposit_id).await?;
        Ok(())
    }
}

/// Generic notification fan-out for lifecycle events with no further
/// side effects (payments, orders, wallet verification).
pub struct NotificationProcessor {
    pub notifier: Arc<dyn NotificationSender>,
}

#[async_trait]
impl EventProcessor for NotificationProcessor {
    async fn process(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        self.notifier
            .send(
                &format!("{}:{}", entry.aggregate_type, entry.aggregate_id),
                &entry.event_type,
                &format!("outbox:{}", entry.id),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use settle_exec::StubNotifier;
    use settle_store::MemoryOutboxQueue;

    #[tokio::test]
    async fn test_notification_processor_is_duplicate_safe() {
        let queue = MemoryOutboxQueue::new();
        let id = queue.push_raw("order_confirmed", serde_json::json!({"order_id": 1}));
        let entry = queue.entry(id).unwrap();

        let notifier = Arc::new(StubNotifier::new());
        let processor = NotificationProcessor { notifier: notifier.clone() };

        processor.process(&entry).await.unwrap();
        processor.process(&entry).await.unwrap();

        assert_eq!(notifier.sent().len(), 1);
    }
}
