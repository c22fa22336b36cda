//! Value Objects
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fractional digits carried by every monetary amount.
pub const AMOUNT_SCALE: u32 = 8;

/// Domain errors for value object validation and state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Wallet address must be 0x followed by 40 hex characters
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Email failed basic validation
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// Transition not present in the aggregate's transition table
    #[error("Invalid state transition: cannot apply {event} in state {current}")]
    InvalidStateTransition {
        /// Actual current state of the aggregate
        current: String,
        /// Event that was rejected
        event: String,
    },
}

// =============================================================================
// Amount
// =============================================================================

/// A positive monetary amount with 8 fractional digits.
///
/// # Invariants
/// - Must be > 0
/// - Rescaled to [`AMOUNT_SCALE`] on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    /// Create a new Amount with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount("Amount must be positive".to_string()));
        }
        let mut value = value;
        value.rescale(AMOUNT_SCALE);
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// WalletAddress
// =============================================================================

/// An on-chain address, stored lower-cased.
///
/// # Invariants
/// - Exactly `0x` followed by 40 hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and normalize an address string
    ///
    /// # Examples
    /// ```
    /// # use settle_domain::value_objects::WalletAddress;
    /// let addr = WalletAddress::parse("0xAbC0000000000000000000000000000000000001").unwrap();
    /// assert_eq!(addr.as_str(), "0xabc0000000000000000000000000000000000001");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAddress` if the format is wrong
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let Some(hex_part) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) else {
            return Err(DomainError::InvalidAddress("Missing 0x prefix".to_string()));
        };

        if hex_part.len() != 40 {
            return Err(DomainError::InvalidAddress(format!(
                "Expected 40 hex characters, got {}",
                hex_part.len()
            )));
        }

        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidAddress("Non-hex character in address".to_string()));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Build from raw 20 bytes
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for b in bytes {
            out.push_str(&format!("{:02x}", b));
        }
        Self(out)
    }

    /// Get the normalized address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive equality against any address string
    pub fn matches(&self, other: &str) -> bool {
        other.eq_ignore_ascii_case(&self.0)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Basic syntactic email validation (a local part, an `@`, and a dotted domain)
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::InvalidEmail(format!("Missing @ in {}", email)));
    };

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(DomainError::InvalidEmail(format!("Malformed email {}", email)));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(100.0)).is_ok());
        assert!(Amount::new(dec!(0.00000001)).is_ok());
        assert!(Amount::new(dec!(0)).is_err());
        assert!(Amount::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_amount_rescales_to_eight_digits() {
        let amount = Amount::new(dec!(97)).unwrap();
        assert_eq!(amount.as_decimal().scale(), 8);
        assert_eq!(amount.as_decimal(), dec!(97.00000000));
    }

    #[test]
    fn test_address_parse_lowercases() {
        let addr = WalletAddress::parse("0xDEADBEEF00000000000000000000000000000001").unwrap();
        assert_eq!(addr.as_str(), "0xdeadbeef00000000000000000000000000000001");
    }

    #[test]
    fn test_address_parse_rejects_bad_input() {
        assert!(WalletAddress::parse("deadbeef").is_err());
        assert!(WalletAddress::parse("0xdeadbeef").is_err()); // too short
        assert!(WalletAddress::parse("0xzzzdbeef00000000000000000000000000000001").is_err());
        assert!(WalletAddress::parse("0xdeadbeef000000000000000000000000000000012").is_err());
    }

    #[test]
    fn test_address_matches_case_insensitive() {
        let addr = WalletAddress::parse("0xabc0000000000000000000000000000000000001").unwrap();
        assert!(addr.matches("0xABC0000000000000000000000000000000000001"));
        assert!(!addr.matches("0xabc0000000000000000000000000000000000002"));
    }

    #[test]
    fn test_address_from_bytes_roundtrip() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xab;
        bytes[19] = 0x01;
        let addr = WalletAddress::from_bytes(&bytes);
        assert_eq!(addr.as_str(), "0xab00000000000000000000000000000000000001");
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("buyer@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("x@").is_err());
        assert!(validate_email("x@nodot").is_err());
    }
}
