//! Balance Arithmetic
//!
//! Pure (available, held) arithmetic shared by the account engine and the
//! poster. Every operation returns the post-state or a typed failure; the
//! caller persists the result. No floating point anywhere.

use crate::types::{BalanceEffect, LedgerError, Result};
use rust_decimal::Decimal;

/// A snapshot of an account's balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub available: Decimal,
    pub held: Decimal,
}

impl Balances {
    pub fn new(available: Decimal, held: Decimal) -> Self {
        Self { available, held }
    }

    pub fn zero() -> Self {
        Self { available: Decimal::ZERO, held: Decimal::ZERO }
    }

    /// available + held
    pub fn total(&self) -> Decimal {
        self.available + self.held
    }

    /// Apply a balance effect, returning the new snapshot.
    ///
    /// # Errors
    /// - `InsufficientBalance` when a debit or hold exceeds available
    /// - `InsufficientHold` when a release or capture exceeds held
    pub fn apply(&self, effect: BalanceEffect, amount: Decimal) -> Result<Balances> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Internal(format!(
                "Balance effect amount must be positive, got {}",
                amount
            )));
        }

        match effect {
            BalanceEffect::Debit => {
                if self.available < amount {
                    return Err(LedgerError::InsufficientBalance {
                        available: self.available,
                        requested: amount,
                    });
                }
                Ok(Balances { available: self.available - amount, held: self.held })
            }
            BalanceEffect::Credit => {
                Ok(Balances { available: self.available + amount, held: self.held })
            }
            BalanceEffect::Hold => {
                if self.available < amount {
                    return Err(LedgerError::InsufficientBalance {
                        available: self.available,
                        requested: amount,
                    });
                }
                Ok(Balances { available: self.available - amount, held: self.held + amount })
            }
            BalanceEffect::Release => {
                if self.held < amount {
                    return Err(LedgerError::InsufficientHold {
                        held: self.held,
                        requested: amount,
                    });
                }
                Ok(Balances { available: self.available + amount, held: self.held - amount })
            }
            BalanceEffect::Capture => {
                if self.held < amount {
                    return Err(LedgerError::InsufficientHold {
                        held: self.held,
                        requested: amount,
                    });
                }
                Ok(Balances { available: self.available, held: self.held - amount })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_debit_and_credit() {
        let b = Balances::new(dec!(100), dec!(0));

        let after = b.apply(BalanceEffect::Debit, dec!(40)).unwrap();
        assert_eq!(after.available, dec!(60));
        assert_eq!(after.held, dec!(0));

        let after = after.apply(BalanceEffect::Credit, dec!(15)).unwrap();
        assert_eq!(after.available, dec!(75));
    }

    #[test]
    fn test_debit_insufficient() {
        let b = Balances::new(dec!(10), dec!(0));
        let err = b.apply(BalanceEffect::Debit, dec!(11)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_hold_release_capture_cycle() {
        let b = Balances::new(dec!(100), dec!(0));

        // Hold keeps the total constant.
        let held = b.apply(BalanceEffect::Hold, dec!(100)).unwrap();
        assert_eq!(held.available, dec!(0));
        assert_eq!(held.held, dec!(100));
        assert_eq!(held.total(), dec!(100));

        // Release restores availability.
        let released = held.apply(BalanceEffect::Release, dec!(100)).unwrap();
        assert_eq!(released, Balances::new(dec!(100), dec!(0)));

        // Capture consumes the hold for good.
        let captured = held.apply(BalanceEffect::Capture, dec!(100)).unwrap();
        assert_eq!(captured, Balances::new(dec!(0), dec!(0)));
    }

    #[test]
    fn test_hold_more_than_available() {
        let b = Balances::new(dec!(50), dec!(0));
        let err = b.apply(BalanceEffect::Hold, dec!(51)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_release_more_than_held() {
        let b = Balances::new(dec!(0), dec!(30));
        let err = b.apply(BalanceEffect::Release, dec!(31)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientHold { .. }));

        let err = b.apply(BalanceEffect::Capture, dec!(31)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientHold { .. }));
    }

    #[test]
    fn test_non_positive_amount_is_internal_error() {
        let b = Balances::new(dec!(10), dec!(0));
        assert!(matches!(
            b.apply(BalanceEffect::Credit, dec!(0)),
            Err(LedgerError::Internal(_))
        ));
        assert!(matches!(
            b.apply(BalanceEffect::Debit, dec!(-5)),
            Err(LedgerError::Internal(_))
        ));
    }

    #[test]
    fn test_balances_never_go_negative() {
        // Exhaust every effect against a small balance; the result is either
        // an error or a snapshot with non-negative components.
        let effects = [
            BalanceEffect::Debit,
            BalanceEffect::Credit,
            BalanceEffect::Hold,
            BalanceEffect::Release,
            BalanceEffect::Capture,
        ];
        let b = Balances::new(dec!(3), dec!(2));
        for effect in effects {
            for amount in [dec!(1), dec!(2), dec!(3), dec!(5), dec!(10)] {
                if let Ok(after) = b.apply(effect, amount) {
                    assert!(after.available >= Decimal::ZERO);
                    assert!(after.held >= Decimal::ZERO);
                }
            }
        }
    }
}
