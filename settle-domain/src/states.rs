//! Aggregate State Machines
//!
//! Each status-bearing aggregate is a deterministic state machine. The
//! transition tables are explicit data: a transition is admissible only if
//! (current state, event) appears in the table. Re-issuing an event whose
//! target is the terminal state the aggregate already sits in is a success
//! no-op; anything else out of a terminal state is rejected with the actual
//! current state in the error.

use crate::value_objects::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Look up (current, event) in a transition table.
///
/// Returns the next state, or `Ok(current)` for an idempotent retry into the
/// same terminal state, or `InvalidStateTransition` otherwise.
fn transition<S, E>(
    table: &[(S, E, S)],
    terminal: &[S],
    current: S,
    event: E,
) -> Result<S, DomainError>
where
    S: Copy + PartialEq + fmt::Display,
    E: Copy + PartialEq + fmt::Display,
{
    for (from, ev, to) in table {
        if *from == current && *ev == event {
            return Ok(*to);
        }
    }

    // Idempotent retry: the event targets the terminal state we are already in.
    if terminal.contains(&current) && table.iter().any(|(_, ev, to)| *ev == event && *to == current)
    {
        return Ok(current);
    }

    Err(DomainError::InvalidStateTransition {
        current: current.to_string(),
        event: event.to_string(),
    })
}

// =============================================================================
// Order
// =============================================================================

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, nothing reserved yet
    Pending,
    /// Inventory reserved
    Confirmed,
    /// Payment authorized
    Paid,
    /// Reserved inventory deducted
    Shipped,
    /// Settlement triggered (terminal)
    Completed,
    /// Reservation released (terminal)
    Cancelled,
    /// Payment reversed (terminal)
    Refunded,
}

/// Events that drive the order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Confirm,
    Pay,
    Ship,
    Complete,
    Cancel,
    Refund,
}

const ORDER_TABLE: &[(OrderStatus, OrderEvent, OrderStatus)] = &[
    (OrderStatus::Pending, OrderEvent::Confirm, OrderStatus::Confirmed),
    (OrderStatus::Confirmed, OrderEvent::Pay, OrderStatus::Paid),
    (OrderStatus::Paid, OrderEvent::Ship, OrderStatus::Shipped),
    (OrderStatus::Shipped, OrderEvent::Complete, OrderStatus::Completed),
    (OrderStatus::Pending, OrderEvent::Cancel, OrderStatus::Cancelled),
    (OrderStatus::Confirmed, OrderEvent::Cancel, OrderStatus::Cancelled),
    (OrderStatus::Paid, OrderEvent::Refund, OrderStatus::Refunded),
];

const ORDER_TERMINAL: &[OrderStatus] =
    &[OrderStatus::Completed, OrderStatus::Cancelled, OrderStatus::Refunded];

/// Apply an event to an order status
pub fn order_transition(current: OrderStatus, event: OrderEvent) -> Result<OrderStatus, DomainError> {
    transition(ORDER_TABLE, ORDER_TERMINAL, current, event)
}

impl OrderStatus {
    /// Stable lower-case name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Parse the stored name back into a status
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "paid" => Some(OrderStatus::Paid),
            "shipped" => Some(OrderStatus::Shipped),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        ORDER_TERMINAL.contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderEvent::Confirm => "confirm",
            OrderEvent::Pay => "pay",
            OrderEvent::Ship => "ship",
            OrderEvent::Complete => "complete",
            OrderEvent::Cancel => "cancel",
            OrderEvent::Refund => "refund",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Payment
// =============================================================================

/// Payment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    /// Payer funds held in escrow
    Authorized,
    /// Escrow paid out to payee and fee account
    Captured,
    /// Hold released (terminal)
    Voided,
    /// Captured funds reversed (terminal)
    Refunded,
}

/// Events that drive the payment state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    Authorize,
    Capture,
    Void,
    Refund,
}

const PAYMENT_TABLE: &[(PaymentStatus, PaymentEvent, PaymentStatus)] = &[
    (PaymentStatus::Pending, PaymentEvent::Authorize, PaymentStatus::Authorized),
    (PaymentStatus::Authorized, PaymentEvent::Capture, PaymentStatus::Captured),
    (PaymentStatus::Authorized, PaymentEvent::Void, PaymentStatus::Voided),
    (PaymentStatus::Captured, PaymentEvent::Refund, PaymentStatus::Refunded),
];

const PAYMENT_TERMINAL: &[PaymentStatus] = &[PaymentStatus::Voided, PaymentStatus::Refunded];

/// Apply an event to a payment status
pub fn payment_transition(
    current: PaymentStatus,
    event: PaymentEvent,
) -> Result<PaymentStatus, DomainError> {
    transition(PAYMENT_TABLE, PAYMENT_TERMINAL, current, event)
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Voided => "voided",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "authorized" => Some(PaymentStatus::Authorized),
            "captured" => Some(PaymentStatus::Captured),
            "voided" => Some(PaymentStatus::Voided),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentEvent::Authorize => "authorize",
            PaymentEvent::Capture => "capture",
            PaymentEvent::Void => "void",
            PaymentEvent::Refund => "refund",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Settlement
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementEvent {
    Start,
    Complete,
    Fail,
}

const SETTLEMENT_TABLE: &[(SettlementStatus, SettlementEvent, SettlementStatus)] = &[
    (SettlementStatus::Pending, SettlementEvent::Start, SettlementStatus::Processing),
    (SettlementStatus::Processing, SettlementEvent::Complete, SettlementStatus::Completed),
    (SettlementStatus::Processing, SettlementEvent::Fail, SettlementStatus::Failed),
];

const SETTLEMENT_TERMINAL: &[SettlementStatus] =
    &[SettlementStatus::Completed, SettlementStatus::Failed];

pub fn settlement_transition(
    current: SettlementStatus,
    event: SettlementEvent,
) -> Result<SettlementStatus, DomainError> {
    transition(SETTLEMENT_TABLE, SETTLEMENT_TERMINAL, current, event)
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettlementStatus::Pending),
            "processing" => Some(SettlementStatus::Processing),
            "completed" => Some(SettlementStatus::Completed),
            "failed" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for SettlementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementEvent::Start => "start",
            SettlementEvent::Complete => "complete",
            SettlementEvent::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Deposit
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Transaction seen on chain
    Detected,
    /// Waiting for required confirmations
    Confirming,
    /// Account balance credited
    Credited,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositEvent {
    Confirm,
    Credit,
    Complete,
    Fail,
}

const DEPOSIT_TABLE: &[(DepositStatus, DepositEvent, DepositStatus)] = &[
    (DepositStatus::Detected, DepositEvent::Confirm, DepositStatus::Confirming),
    (DepositStatus::Confirming, DepositEvent::Credit, DepositStatus::Credited),
    (DepositStatus::Credited, DepositEvent::Complete, DepositStatus::Completed),
    (DepositStatus::Detected, DepositEvent::Fail, DepositStatus::Failed),
    (DepositStatus::Confirming, DepositEvent::Fail, DepositStatus::Failed),
];

const DEPOSIT_TERMINAL: &[DepositStatus] = &[DepositStatus::Completed, DepositStatus::Failed];

pub fn deposit_transition(
    current: DepositStatus,
    event: DepositEvent,
) -> Result<DepositStatus, DomainError> {
    transition(DEPOSIT_TABLE, DEPOSIT_TERMINAL, current, event)
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Detected => "detected",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Credited => "credited",
            DepositStatus::Completed => "completed",
            DepositStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(DepositStatus::Detected),
            "confirming" => Some(DepositStatus::Confirming),
            "credited" => Some(DepositStatus::Credited),
            "completed" => Some(DepositStatus::Completed),
            "failed" => Some(DepositStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for DepositEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DepositEvent::Confirm => "confirm",
            DepositEvent::Credit => "credit",
            DepositEvent::Complete => "complete",
            DepositEvent::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Withdrawal
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Available balance moved to hold
    Pending,
    Approved,
    /// Sent to chain
    Submitted,
    /// Confirmed on chain
    Confirmed,
    /// Hold captured (terminal)
    Completed,
    /// Hold reversed (terminal)
    Rejected,
    /// Hold reversed (terminal)
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalEvent {
    Approve,
    Submit,
    Confirm,
    Complete,
    Reject,
    Fail,
}

const WITHDRAWAL_TABLE: &[(WithdrawalStatus, WithdrawalEvent, WithdrawalStatus)] = &[
    (WithdrawalStatus::Pending, WithdrawalEvent::Approve, WithdrawalStatus::Approved),
    (WithdrawalStatus::Approved, WithdrawalEvent::Submit, WithdrawalStatus::Submitted),
    (WithdrawalStatus::Submitted, WithdrawalEvent::Confirm, WithdrawalStatus::Confirmed),
    (WithdrawalStatus::Confirmed, WithdrawalEvent::Complete, WithdrawalStatus::Completed),
    (WithdrawalStatus::Pending, WithdrawalEvent::Reject, WithdrawalStatus::Rejected),
    (WithdrawalStatus::Approved, WithdrawalEvent::Fail, WithdrawalStatus::Failed),
    (WithdrawalStatus::Submitted, WithdrawalEvent::Fail, WithdrawalStatus::Failed),
    (WithdrawalStatus::Confirmed, WithdrawalEvent::Fail, WithdrawalStatus::Failed),
];

const WITHDRAWAL_TERMINAL: &[WithdrawalStatus] =
    &[WithdrawalStatus::Completed, WithdrawalStatus::Rejected, WithdrawalStatus::Failed];

pub fn withdrawal_transition(
    current: WithdrawalStatus,
    event: WithdrawalEvent,
) -> Result<WithdrawalStatus, DomainError> {
    transition(WITHDRAWAL_TABLE, WITHDRAWAL_TERMINAL, current, event)
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Submitted => "submitted",
            WithdrawalStatus::Confirmed => "confirmed",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawalStatus::Pending),
            "approved" => Some(WithdrawalStatus::Approved),
            "submitted" => Some(WithdrawalStatus::Submitted),
            "confirmed" => Some(WithdrawalStatus::Confirmed),
            "completed" => Some(WithdrawalStatus::Completed),
            "rejected" => Some(WithdrawalStatus::Rejected),
            "failed" => Some(WithdrawalStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        WITHDRAWAL_TERMINAL.contains(self)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for WithdrawalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WithdrawalEvent::Approve => "approve",
            WithdrawalEvent::Submit => "submit",
            WithdrawalEvent::Confirm => "confirm",
            WithdrawalEvent::Complete => "complete",
            WithdrawalEvent::Reject => "reject",
            WithdrawalEvent::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_happy_path() {
        let mut status = OrderStatus::Pending;
        for event in [OrderEvent::Confirm, OrderEvent::Pay, OrderEvent::Ship, OrderEvent::Complete]
        {
            status = order_transition(status, event).unwrap();
        }
        assert_eq!(status, OrderStatus::Completed);
    }

    #[test]
    fn test_order_cancel_only_before_payment() {
        assert_eq!(
            order_transition(OrderStatus::Pending, OrderEvent::Cancel).unwrap(),
            OrderStatus::Cancelled
        );
        assert_eq!(
            order_transition(OrderStatus::Confirmed, OrderEvent::Cancel).unwrap(),
            OrderStatus::Cancelled
        );
        assert!(order_transition(OrderStatus::Paid, OrderEvent::Cancel).is_err());
        assert!(order_transition(OrderStatus::Shipped, OrderEvent::Cancel).is_err());
    }

    #[test]
    fn test_order_refund_only_from_paid() {
        assert_eq!(
            order_transition(OrderStatus::Paid, OrderEvent::Refund).unwrap(),
            OrderStatus::Refunded
        );
        assert!(order_transition(OrderStatus::Pending, OrderEvent::Refund).is_err());
        assert!(order_transition(OrderStatus::Shipped, OrderEvent::Refund).is_err());
    }

    #[test]
    fn test_order_terminal_idempotent_retry() {
        // Re-issuing the event that produced the terminal state is a no-op.
        assert_eq!(
            order_transition(OrderStatus::Cancelled, OrderEvent::Cancel).unwrap(),
            OrderStatus::Cancelled
        );
        assert_eq!(
            order_transition(OrderStatus::Completed, OrderEvent::Complete).unwrap(),
            OrderStatus::Completed
        );
        // A different event out of a terminal state is rejected.
        assert!(order_transition(OrderStatus::Cancelled, OrderEvent::Confirm).is_err());
        assert!(order_transition(OrderStatus::Completed, OrderEvent::Cancel).is_err());
    }

    #[test]
    fn test_transition_error_carries_current_state() {
        let err = order_transition(OrderStatus::Shipped, OrderEvent::Pay).unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, event } => {
                assert_eq!(current, "shipped");
                assert_eq!(event, "pay");
            }
            other => panic!("Expected InvalidStateTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_payment_lifecycle() {
        let authorized =
            payment_transition(PaymentStatus::Pending, PaymentEvent::Authorize).unwrap();
        assert_eq!(authorized, PaymentStatus::Authorized);

        assert_eq!(
            payment_transition(authorized, PaymentEvent::Capture).unwrap(),
            PaymentStatus::Captured
        );
        assert_eq!(
            payment_transition(authorized, PaymentEvent::Void).unwrap(),
            PaymentStatus::Voided
        );
        assert_eq!(
            payment_transition(PaymentStatus::Captured, PaymentEvent::Refund).unwrap(),
            PaymentStatus::Refunded
        );
    }

    #[test]
    fn test_payment_capture_after_void_rejected() {
        let err = payment_transition(PaymentStatus::Voided, PaymentEvent::Capture).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_payment_double_void_is_noop() {
        assert_eq!(
            payment_transition(PaymentStatus::Voided, PaymentEvent::Void).unwrap(),
            PaymentStatus::Voided
        );
    }

    #[test]
    fn test_settlement_lifecycle() {
        let processing =
            settlement_transition(SettlementStatus::Pending, SettlementEvent::Start).unwrap();
        assert_eq!(processing, SettlementStatus::Processing);
        assert_eq!(
            settlement_transition(processing, SettlementEvent::Complete).unwrap(),
            SettlementStatus::Completed
        );
        assert_eq!(
            settlement_transition(processing, SettlementEvent::Fail).unwrap(),
            SettlementStatus::Failed
        );
        assert!(settlement_transition(SettlementStatus::Pending, SettlementEvent::Complete).is_err());
    }

    #[test]
    fn test_deposit_lifecycle() {
        let mut status = DepositStatus::Detected;
        for event in [DepositEvent::Confirm, DepositEvent::Credit, DepositEvent::Complete] {
            status = deposit_transition(status, event).unwrap();
        }
        assert_eq!(status, DepositStatus::Completed);

        // Credited deposits cannot fail anymore.
        assert!(deposit_transition(DepositStatus::Credited, DepositEvent::Fail).is_err());
    }

    #[test]
    fn test_withdrawal_lifecycle() {
        let mut status = WithdrawalStatus::Pending;
        for event in [
            WithdrawalEvent::Approve,
            WithdrawalEvent::Submit,
            WithdrawalEvent::Confirm,
            WithdrawalEvent::Complete,
        ] {
            status = withdrawal_transition(status, event).unwrap();
        }
        assert_eq!(status, WithdrawalStatus::Completed);
    }

    #[test]
    fn test_withdrawal_reject_only_from_pending() {
        assert_eq!(
            withdrawal_transition(WithdrawalStatus::Pending, WithdrawalEvent::Reject).unwrap(),
            WithdrawalStatus::Rejected
        );
        assert!(withdrawal_transition(WithdrawalStatus::Submitted, WithdrawalEvent::Reject).is_err());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("bogus"), None);
    }
}
