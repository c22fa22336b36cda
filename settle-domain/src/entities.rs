//! Domain Entities
//!
//! Core business entities with identity and lifecycle. Status-bearing
//! aggregates are mutated only through the transition tables in
//! [`crate::states`]; the structs here carry the data and the small
//! predicates the services need.

use crate::states::{
    DepositStatus, OrderStatus, PaymentStatus, SettlementStatus, WithdrawalStatus,
};
use crate::value_objects::DomainError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// User
// =============================================================================

/// Role a user plays in the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Buyer,
    Seller,
    Both,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Buyer => "buyer",
            UserRole::Seller => "seller",
            UserRole::Both => "both",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buyer" => Some(UserRole::Buyer),
            "seller" => Some(UserRole::Seller),
            "both" => Some(UserRole::Both),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// KYC verification progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    None,
    Pending,
    Verified,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::None => "none",
            KycStatus::Pending => "pending",
            KycStatus::Verified => "verified",
            KycStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(KycStatus::None),
            "pending" => Some(KycStatus::Pending),
            "verified" => Some(KycStatus::Verified),
            "rejected" => Some(KycStatus::Rejected),
            _ => None,
        }
    }
}

/// Account standing of a user. Deleted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            "deleted" => Some(UserStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered marketplace participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub external_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub kyc_status: KycStatus,
    /// Set on the first transition into Verified, preserved thereafter
    pub kyc_verified_at: Option<DateTime<Utc>>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Apply a KYC decision, keeping the first verification timestamp.
    pub fn apply_kyc(&mut self, next: KycStatus, now: DateTime<Utc>) {
        if next == KycStatus::Verified && self.kyc_verified_at.is_none() {
            self.kyc_verified_at = Some(now);
        }
        self.kyc_status = next;
    }
}

// =============================================================================
// Wallet
// =============================================================================

/// A user-owned on-chain wallet.
///
/// # Invariants
/// - unique active address across non-deleted rows
/// - at most one primary per user
/// - primary implies verified
/// - primary cannot be deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    /// Lower-cased 0x address
    pub address: String,
    pub label: Option<String>,
    pub is_primary: bool,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Primary requires verified; deleting a primary wallet is forbidden.
    pub fn can_become_primary(&self) -> bool {
        self.is_verified && !self.is_deleted()
    }
}

/// Roles of the operator-owned system wallets; one row per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemWalletRole {
    Treasury,
    Minter,
    Burner,
    Hot,
    Cold,
}

impl SystemWalletRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemWalletRole::Treasury => "treasury",
            SystemWalletRole::Minter => "minter",
            SystemWalletRole::Burner => "burner",
            SystemWalletRole::Hot => "hot",
            SystemWalletRole::Cold => "cold",
        }
    }

    /// All roles, used when seeding.
    pub fn all() -> [SystemWalletRole; 5] {
        [
            SystemWalletRole::Treasury,
            SystemWalletRole::Minter,
            SystemWalletRole::Burner,
            SystemWalletRole::Hot,
            SystemWalletRole::Cold,
        ]
    }
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    User,
    Merchant,
    Escrow,
    System,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::User => "user",
            AccountType::Merchant => "merchant",
            AccountType::Escrow => "escrow",
            AccountType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(AccountType::User),
            "merchant" => Some(AccountType::Merchant),
            "escrow" => Some(AccountType::Escrow),
            "system" => Some(AccountType::System),
            _ => None,
        }
    }
}

/// Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

/// A balance-carrying account.
///
/// The balance snapshot is a materialized view over the ledger; mutations go
/// through the balance engine, which bumps `version` on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub external_id: Uuid,
    pub account_type: AccountType,
    pub owner_id: Option<i64>,
    pub primary_wallet_id: Option<i64>,
    pub available_balance: Decimal,
    pub held_balance: Decimal,
    pub version: i64,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Total funds attributable to the account (available + held).
    pub fn total_balance(&self) -> Decimal {
        self.available_balance + self.held_balance
    }
}

// =============================================================================
// Product and inventory
// =============================================================================

/// A catalog item offered by a seller. Prices are fiat, 2 fractional digits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub external_id: Uuid,
    pub seller_id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Order
// =============================================================================

/// A line item; unit_price is a snapshot of the product price at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// An order aggregate; total_amount is immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub external_id: Uuid,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Σ(quantity × unit_price) over the items of an order.
pub fn order_total(items: &[(i32, Decimal)]) -> Result<Decimal, DomainError> {
    let mut total = Decimal::ZERO;
    for (quantity, unit_price) in items {
        if *quantity <= 0 {
            return Err(DomainError::InvalidAmount(format!(
                "Order item quantity must be positive, got {}",
                quantity
            )));
        }
        if *unit_price < Decimal::ZERO {
            return Err(DomainError::InvalidAmount("Unit price cannot be negative".to_string()));
        }
        total += *unit_price * Decimal::from(*quantity);
    }
    Ok(total)
}

// =============================================================================
// Payment
// =============================================================================

/// A payment aggregate; holds payer funds in escrow between authorize and
/// capture/void.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub external_id: Uuid,
    pub order_id: Option<i64>,
    pub payer_account_id: i64,
    pub payee_account_id: i64,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub status: PaymentStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// An Authorized payment past its expiry cannot be captured.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Authorized
            && self.expires_at.map(|e| now > e).unwrap_or(false)
    }

    /// Amount paid to the payee after the fee split.
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.fee_amount
    }
}

// =============================================================================
// Settlement
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: i64,
    pub external_id: Uuid,
    pub payment_id: Option<i64>,
    pub merchant_account_id: i64,
    pub amount: Decimal,
    pub status: SettlementStatus,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Deposit / Withdrawal
// =============================================================================

/// An inbound on-chain transfer being confirmed and credited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: i64,
    pub external_id: Uuid,
    pub account_id: i64,
    pub from_address: String,
    pub tx_hash: String,
    pub amount: Decimal,
    pub confirmations: i32,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An outbound transfer; the amount is held from Pending until the terminal
/// state resolves the hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: i64,
    pub external_id: Uuid,
    pub account_id: i64,
    pub to_address: String,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: 1,
            external_id: Uuid::new_v4(),
            email: "buyer@example.com".to_string(),
            name: "Buyer".to_string(),
            role: UserRole::Buyer,
            kyc_status: KycStatus::None,
            kyc_verified_at: None,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_kyc_verified_at_set_once() {
        let mut user = test_user();
        let first = Utc::now();
        user.apply_kyc(KycStatus::Verified, first);
        assert_eq!(user.kyc_verified_at, Some(first));

        // A later rejection and re-verification keeps the original timestamp.
        user.apply_kyc(KycStatus::Rejected, Utc::now());
        let second = Utc::now();
        user.apply_kyc(KycStatus::Verified, second);
        assert_eq!(user.kyc_status, KycStatus::Verified);
        assert_eq!(user.kyc_verified_at, Some(first));
    }

    #[test]
    fn test_order_total() {
        let total = order_total(&[(2, dec!(10.50)), (1, dec!(3.00))]).unwrap();
        assert_eq!(total, dec!(24.00));
    }

    #[test]
    fn test_order_total_rejects_bad_items() {
        assert!(order_total(&[(0, dec!(10))]).is_err());
        assert!(order_total(&[(-1, dec!(10))]).is_err());
        assert!(order_total(&[(1, dec!(-1))]).is_err());
    }

    #[test]
    fn test_payment_expiry() {
        let now = Utc::now();
        let payment = Payment {
            id: 1,
            external_id: Uuid::new_v4(),
            order_id: None,
            payer_account_id: 1,
            payee_account_id: 2,
            amount: dec!(100),
            fee_amount: dec!(3),
            status: PaymentStatus::Authorized,
            expires_at: Some(now - chrono::Duration::minutes(1)),
            authorized_at: Some(now - chrono::Duration::minutes(30)),
            captured_at: None,
            created_at: now,
            updated_at: now,
        };

        assert!(payment.is_expired(now));
        assert_eq!(payment.net_amount(), dec!(97));

        // Expiry only applies while Authorized.
        let captured = Payment { status: PaymentStatus::Captured, ..payment };
        assert!(!captured.is_expired(now));
    }

    #[test]
    fn test_wallet_primary_requires_verified() {
        let now = Utc::now();
        let mut wallet = Wallet {
            id: 1,
            external_id: Uuid::new_v4(),
            user_id: 1,
            address: "0xabc0000000000000000000000000000000000001".to_string(),
            label: None,
            is_primary: false,
            is_verified: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        assert!(!wallet.can_become_primary());
        wallet.is_verified = true;
        assert!(wallet.can_become_primary());
        wallet.deleted_at = Some(now);
        assert!(!wallet.can_become_primary());
    }

    #[test]
    fn test_account_total_balance() {
        let now = Utc::now();
        let account = Account {
            id: 1,
            external_id: Uuid::new_v4(),
            account_type: AccountType::User,
            owner_id: Some(1),
            primary_wallet_id: None,
            available_balance: dec!(70),
            held_balance: dec!(30),
            version: 0,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(account.total_balance(), dec!(100));
    }

    #[test]
    fn test_system_wallet_roles_are_distinct() {
        let roles = SystemWalletRole::all();
        for (i, a) in roles.iter().enumerate() {
            for b in roles.iter().skip(i + 1) {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }
}
