//! Payment lifecycle scenarios at the ledger/state-machine level.
//!
//! Exercises the authorize → capture and authorize → void paths the way the
//! payment service composes them, asserting the double-entry invariant and
//! the balance post-states without a database.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_domain::states::{payment_transition, PaymentEvent, PaymentStatus};
use settle_domain::value_objects::Amount;
use settle_ledger::balance::Balances;
use settle_ledger::batch::{BalancedBatch, BatchBuilder};
use settle_ledger::types::{BalanceEffect, EntrySide};
use std::collections::HashMap;

const PAYER: i64 = 1;
const ESCROW: i64 = 2;
const MERCHANT: i64 = 3;
const FEES: i64 = 4;

fn amt(d: Decimal) -> Amount {
    Amount::new(d).unwrap()
}

/// Apply a balanced batch to in-memory balances, entry by entry, the way
/// the poster does against account rows.
fn apply_batch(accounts: &mut HashMap<i64, Balances>, batch: &BalancedBatch) {
    for entry in batch.entries() {
        let current = accounts.get(&entry.account_id).copied().unwrap_or_else(Balances::zero);
        let next = current.apply(entry.effect, entry.amount).expect("entry applies");
        accounts.insert(entry.account_id, next);
    }
}

fn assert_group_balanced(batch: &BalancedBatch) {
    let debit: Decimal = batch
        .entries()
        .iter()
        .filter(|e| e.side == EntrySide::Debit)
        .map(|e| e.amount)
        .sum();
    let credit: Decimal = batch
        .entries()
        .iter()
        .filter(|e| e.side == EntrySide::Credit)
        .map(|e| e.amount)
        .sum();
    assert_eq!(debit, credit, "group must balance");
}

fn authorize_batch(amount: Decimal, payment_id: i64) -> BalancedBatch {
    BatchBuilder::new()
        .debit_hold(PAYER, amt(amount), "payment_authorize", payment_id, "hold")
        .credit(ESCROW, amt(amount), "payment_authorize", payment_id, "escrow in")
        .build()
        .unwrap()
}

fn capture_batch(amount: Decimal, fee: Decimal, payment_id: i64) -> BalancedBatch {
    BatchBuilder::new()
        .debit(ESCROW, amt(amount), "payment_capture", payment_id, "escrow out")
        .credit(MERCHANT, amt(amount - fee), "payment_capture", payment_id, "payout")
        .credit(FEES, amt(fee), "payment_capture", payment_id, "fee")
        .build()
        .unwrap()
}

fn void_batch(amount: Decimal, payment_id: i64) -> BalancedBatch {
    BatchBuilder::new()
        .debit(ESCROW, amt(amount), "payment_void", payment_id, "escrow return")
        .credit_release(PAYER, amt(amount), "payment_void", payment_id, "released")
        .build()
        .unwrap()
}

#[test]
fn authorize_then_capture_with_fee_split() {
    // S3 shape: payer 100 available; authorize 100; capture with 3% fee.
    let mut accounts: HashMap<i64, Balances> = HashMap::new();
    accounts.insert(PAYER, Balances::new(dec!(100), dec!(0)));

    let mut status = PaymentStatus::Pending;

    // Authorize
    status = payment_transition(status, PaymentEvent::Authorize).unwrap();
    let auth = authorize_batch(dec!(100), 7);
    assert_group_balanced(&auth);
    apply_batch(&mut accounts, &auth);

    assert_eq!(accounts[&PAYER], Balances::new(dec!(0), dec!(100)));
    assert_eq!(accounts[&ESCROW].available, dec!(100));

    // Capture: 3-entry group plus the entry-less payer hold consumption.
    status = payment_transition(status, PaymentEvent::Capture).unwrap();
    assert_eq!(status, PaymentStatus::Captured);

    let cap = capture_batch(dec!(100), dec!(3), 7);
    assert_group_balanced(&cap);
    apply_batch(&mut accounts, &cap);

    let payer = accounts[&PAYER].apply(BalanceEffect::Capture, dec!(100)).unwrap();
    accounts.insert(PAYER, payer);

    assert_eq!(accounts[&PAYER], Balances::new(dec!(0), dec!(0)));
    assert_eq!(accounts[&ESCROW].available, dec!(0));
    assert_eq!(accounts[&MERCHANT].available, dec!(97.00000000));
    assert_eq!(accounts[&FEES].available, dec!(3.00000000));
}

#[test]
fn authorize_then_void_restores_payer() {
    // S4 shape: void returns the hold, capture afterwards is inadmissible.
    let mut accounts: HashMap<i64, Balances> = HashMap::new();
    accounts.insert(PAYER, Balances::new(dec!(100), dec!(0)));

    let mut status = payment_transition(PaymentStatus::Pending, PaymentEvent::Authorize).unwrap();
    apply_batch(&mut accounts, &authorize_batch(dec!(100), 9));

    status = payment_transition(status, PaymentEvent::Void).unwrap();
    assert_eq!(status, PaymentStatus::Voided);

    let void = void_batch(dec!(100), 9);
    assert_group_balanced(&void);
    apply_batch(&mut accounts, &void);

    assert_eq!(accounts[&PAYER], Balances::new(dec!(100), dec!(0)));
    assert_eq!(accounts[&ESCROW].available, dec!(0));

    // Replaying the void is an idempotent no-op.
    let replay = payment_transition(status, PaymentEvent::Void).unwrap();
    assert_eq!(replay, PaymentStatus::Voided);

    let err = payment_transition(status, PaymentEvent::Capture).unwrap_err();
    match err {
        settle_domain::value_objects::DomainError::InvalidStateTransition { current, .. } => {
            assert_eq!(current, "voided");
        }
        other => panic!("Expected InvalidStateTransition, got {:?}", other),
    }
}

#[test]
fn refund_reverses_capture_exactly() {
    let mut accounts: HashMap<i64, Balances> = HashMap::new();
    accounts.insert(PAYER, Balances::new(dec!(100), dec!(0)));

    // Full authorize + capture cycle.
    apply_batch(&mut accounts, &authorize_batch(dec!(100), 11));
    apply_batch(&mut accounts, &capture_batch(dec!(100), dec!(3), 11));
    let payer = accounts[&PAYER].apply(BalanceEffect::Capture, dec!(100)).unwrap();
    accounts.insert(PAYER, payer);

    // Refund: merchant and fee give back, payer is made whole.
    let refund = BatchBuilder::new()
        .debit(MERCHANT, amt(dec!(97)), "payment_refund", 11, "payout reversal")
        .debit(FEES, amt(dec!(3)), "payment_refund", 11, "fee reversal")
        .credit(PAYER, amt(dec!(100)), "payment_refund", 11, "refund")
        .build()
        .unwrap();
    assert_group_balanced(&refund);
    apply_batch(&mut accounts, &refund);

    assert_eq!(accounts[&PAYER].available, dec!(100.00000000));
    assert_eq!(accounts[&MERCHANT].available, dec!(0));
    assert_eq!(accounts[&FEES].available, dec!(0));

    let status = payment_transition(PaymentStatus::Captured, PaymentEvent::Refund).unwrap();
    assert_eq!(status, PaymentStatus::Refunded);
}

#[test]
fn capture_cannot_over_release_escrow() {
    // An unbalanced capture never leaves the builder.
    let result = BatchBuilder::new()
        .debit(ESCROW, amt(dec!(100)), "payment_capture", 13, "escrow out")
        .credit(MERCHANT, amt(dec!(98)), "payment_capture", 13, "payout")
        .credit(FEES, amt(dec!(3)), "payment_capture", 13, "fee")
        .build();

    assert!(result.is_err());
}
