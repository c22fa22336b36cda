//! Balanced Batch Builder
//!
//! In-memory shape that makes the double-entry invariant a precondition:
//! a `BalancedBatch` can only be obtained from entries whose debit and
//! credit sums match, so the poster never sees an unbalanced set.

use crate::types::{BalanceEffect, EntrySide, LedgerError, NewEntry, Result};
use rust_decimal::Decimal;
use settle_domain::value_objects::Amount;

/// Builder collecting entries for one transaction group.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    entries: Vec<NewEntry>,
}

/// A validated, balanced set of entries ready for posting.
#[derive(Debug)]
pub struct BalancedBatch {
    entries: Vec<NewEntry>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(
        mut self,
        account_id: i64,
        side: EntrySide,
        effect: BalanceEffect,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.entries.push(NewEntry {
            account_id,
            side,
            effect,
            amount: amount.as_decimal(),
            reference_type: reference_type.to_string(),
            reference_id,
            description: description.to_string(),
        });
        self
    }

    /// Debit the available balance.
    pub fn debit(
        self,
        account_id: i64,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.push(
            account_id,
            EntrySide::Debit,
            BalanceEffect::Debit,
            amount,
            reference_type,
            reference_id,
            description,
        )
    }

    /// Credit the available balance.
    pub fn credit(
        self,
        account_id: i64,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.push(
            account_id,
            EntrySide::Credit,
            BalanceEffect::Credit,
            amount,
            reference_type,
            reference_id,
            description,
        )
    }

    /// Debit entry whose effect parks funds in the held balance
    /// (payment authorization on the payer account).
    pub fn debit_hold(
        self,
        account_id: i64,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.push(
            account_id,
            EntrySide::Debit,
            BalanceEffect::Hold,
            amount,
            reference_type,
            reference_id,
            description,
        )
    }

    /// Credit entry whose effect returns held funds to available
    /// (void on the payer account).
    pub fn credit_release(
        self,
        account_id: i64,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.push(
            account_id,
            EntrySide::Credit,
            BalanceEffect::Release,
            amount,
            reference_type,
            reference_id,
            description,
        )
    }

    /// Debit entry whose effect consumes held funds
    /// (capture on the payer account when it carries the escrow hold).
    pub fn debit_capture(
        self,
        account_id: i64,
        amount: Amount,
        reference_type: &str,
        reference_id: i64,
        description: &str,
    ) -> Self {
        self.push(
            account_id,
            EntrySide::Debit,
            BalanceEffect::Capture,
            amount,
            reference_type,
            reference_id,
            description,
        )
    }

    /// Validate the collected entries into a `BalancedBatch`.
    ///
    /// # Errors
    /// - `Unbalanced` when Σdebit != Σcredit
    /// - `Internal` on an empty batch
    pub fn build(self) -> Result<BalancedBatch> {
        if self.entries.is_empty() {
            return Err(LedgerError::Internal("Empty ledger batch".to_string()));
        }

        let mut debit = Decimal::ZERO;
        let mut credit = Decimal::ZERO;
        for entry in &self.entries {
            match entry.side {
                EntrySide::Debit => debit += entry.amount,
                EntrySide::Credit => credit += entry.amount,
            }
        }

        if debit != credit {
            return Err(LedgerError::Unbalanced { debit, credit });
        }

        Ok(BalancedBatch { entries: self.entries })
    }
}

impl BalancedBatch {
    /// Entries in insertion order.
    pub fn entries(&self) -> &[NewEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amt(d: Decimal) -> Amount {
        Amount::new(d).unwrap()
    }

    #[test]
    fn test_balanced_batch_builds() {
        let batch = BatchBuilder::new()
            .debit_hold(1, amt(dec!(100)), "payment_authorize", 7, "authorize payment 7")
            .credit(2, amt(dec!(100)), "payment_authorize", 7, "escrow for payment 7")
            .build()
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.entries()[0].side, EntrySide::Debit);
        assert_eq!(batch.entries()[0].effect, BalanceEffect::Hold);
        assert_eq!(batch.entries()[1].effect, BalanceEffect::Credit);
    }

    #[test]
    fn test_unbalanced_batch_rejected() {
        let err = BatchBuilder::new()
            .debit(1, amt(dec!(100)), "t", 1, "")
            .credit(2, amt(dec!(99)), "t", 1, "")
            .build()
            .unwrap_err();

        match err {
            LedgerError::Unbalanced { debit, credit } => {
                assert_eq!(debit, dec!(100.00000000));
                assert_eq!(credit, dec!(99.00000000));
            }
            other => panic!("Expected Unbalanced, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(BatchBuilder::new().build(), Err(LedgerError::Internal(_))));
    }

    #[test]
    fn test_capture_fee_split_balances() {
        // Capture with 3% fee: escrow 100 out, merchant 97 + fee 3 in.
        let batch = BatchBuilder::new()
            .debit(10, amt(dec!(100)), "payment_capture", 7, "escrow out")
            .credit(20, amt(dec!(97)), "payment_capture", 7, "merchant payout")
            .credit(30, amt(dec!(3)), "payment_capture", 7, "platform fee")
            .build()
            .unwrap();

        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_amounts_are_rescaled_consistently() {
        // 0.1 + 0.2 on one side against 0.3 on the other must balance exactly
        // under fixed-point arithmetic.
        let batch = BatchBuilder::new()
            .debit(1, amt(dec!(0.1)), "t", 1, "")
            .debit(1, amt(dec!(0.2)), "t", 1, "")
            .credit(2, amt(dec!(0.3)), "t", 1, "")
            .build();
        assert!(batch.is_ok());
    }
}
