//! Domain Events
//!
//! Events represent committed state changes. They are enqueued into the
//! transactional outbox in the same unit of work as the business write and
//! dispatched by the outbox worker. Processors must be duplicate-safe.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain events emitted by the aggregate services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Wallet ownership proven by signature
    WalletVerified {
        wallet_id: i64,
        user_id: i64,
        address: String,
        timestamp: DateTime<Utc>,
    },

    /// Order confirmed, inventory reserved
    OrderConfirmed {
        order_id: i64,
        buyer_id: i64,
        total_amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Order cancelled, reservation released
    OrderCancelled {
        order_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Order completed, settlement triggered
    OrderCompleted {
        order_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Payer funds moved into escrow
    PaymentAuthorized {
        payment_id: i64,
        payer_account_id: i64,
        amount: Decimal,
        expires_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// Escrow paid out to payee and fee account
    PaymentCaptured {
        payment_id: i64,
        payee_account_id: i64,
        amount: Decimal,
        fee_amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Authorization hold released
    PaymentVoided {
        payment_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Captured payment reversed
    PaymentRefunded {
        payment_id: i64,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Settlement payout requested towards the chain
    SettlementExecuted {
        settlement_id: i64,
        merchant_account_id: i64,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Deposit credited to the account balance
    DepositCredited {
        deposit_id: i64,
        account_id: i64,
        amount: Decimal,
        tx_hash: String,
        timestamp: DateTime<Utc>,
    },

    /// Withdrawal approved and ready for chain submission
    WithdrawalApproved {
        withdrawal_id: i64,
        account_id: i64,
        to_address: String,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Withdrawal finished, hold captured
    WithdrawalCompleted {
        withdrawal_id: i64,
        tx_hash: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Withdrawal rejected or failed, hold reversed
    WithdrawalReversed {
        withdrawal_id: i64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Stable event type name, used as the outbox routing key.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::WalletVerified { .. } => "wallet_verified",
            DomainEvent::OrderConfirmed { .. } => "order_confirmed",
            DomainEvent::OrderCancelled { .. } => "order_cancelled",
            DomainEvent::OrderCompleted { .. } => "order_completed",
            DomainEvent::PaymentAuthorized { .. } => "payment_authorized",
            DomainEvent::PaymentCaptured { .. } => "payment_captured",
            DomainEvent::PaymentVoided { .. } => "payment_voided",
            DomainEvent::PaymentRefunded { .. } => "payment_refunded",
            DomainEvent::SettlementExecuted { .. } => "settlement_executed",
            DomainEvent::DepositCredited { .. } => "deposit_credited",
            DomainEvent::WithdrawalApproved { .. } => "withdrawal_approved",
            DomainEvent::WithdrawalCompleted { .. } => "withdrawal_completed",
            DomainEvent::WithdrawalReversed { .. } => "withdrawal_reversed",
        }
    }

    /// Aggregate kind this event belongs to.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            DomainEvent::WalletVerified { .. } => "wallet",
            DomainEvent::OrderConfirmed { .. }
            | DomainEvent::OrderCancelled { .. }
            | DomainEvent::OrderCompleted { .. } => "order",
            DomainEvent::PaymentAuthorized { .. }
            | DomainEvent::PaymentCaptured { .. }
            | DomainEvent::PaymentVoided { .. }
            | DomainEvent::PaymentRefunded { .. } => "payment",
            DomainEvent::SettlementExecuted { .. } => "settlement",
            DomainEvent::DepositCredited { .. } => "deposit",
            DomainEvent::WithdrawalApproved { .. }
            | DomainEvent::WithdrawalCompleted { .. }
            | DomainEvent::WithdrawalReversed { .. } => "withdrawal",
        }
    }

    /// Internal id of the owning aggregate.
    pub fn aggregate_id(&self) -> i64 {
        match self {
            DomainEvent::WalletVerified { wallet_id, .. } => *wallet_id,
            DomainEvent::OrderConfirmed { order_id, .. }
            | DomainEvent::OrderCancelled { order_id, .. }
            | DomainEvent::OrderCompleted { order_id, .. } => *order_id,
            DomainEvent::PaymentAuthorized { payment_id, .. }
            | DomainEvent::PaymentCaptured { payment_id, .. }
            | DomainEvent::PaymentVoided { payment_id, .. }
            | DomainEvent::PaymentRefunded { payment_id, .. } => *payment_id,
            DomainEvent::SettlementExecuted { settlement_id, .. } => *settlement_id,
            DomainEvent::DepositCredited { deposit_id, .. } => *deposit_id,
            DomainEvent::WithdrawalApproved { withdrawal_id, .. }
            | DomainEvent::WithdrawalCompleted { withdrawal_id, .. }
            | DomainEvent::WithdrawalReversed { withdrawal_id, .. } => *withdrawal_id,
        }
    }
}

/// A new transaction-group id for a ledger posting.
pub fn new_transaction_group_id() -> Uuid {
    Uuid::new_v4()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_authorized() -> DomainEvent {
        DomainEvent::PaymentAuthorized {
            payment_id: 42,
            payer_account_id: 7,
            amount: dec!(100),
            expires_at: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = sample_authorized();
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_event_json_has_type_tag() {
        let json = serde_json::to_value(sample_authorized()).unwrap();
        assert_eq!(json["type"], "payment_authorized");
        assert_eq!(json["payment_id"], 42);
    }

    #[test]
    fn test_event_accessors() {
        let event = sample_authorized();
        assert_eq!(event.event_type(), "payment_authorized");
        assert_eq!(event.aggregate_type(), "payment");
        assert_eq!(event.aggregate_id(), 42);

        let event = DomainEvent::WalletVerified {
            wallet_id: 9,
            user_id: 1,
            address: "0xabc0000000000000000000000000000000000001".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "wallet_verified");
        assert_eq!(event.aggregate_type(), "wallet");
        assert_eq!(event.aggregate_id(), 9);
    }
}
