//! Settlement Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, domain events, and the state-machine
//! transition tables for every status-bearing aggregate.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod events;
pub mod states;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Account, AccountStatus, AccountType, Deposit, KycStatus, Order, OrderItem, Payment, Product,
    Settlement, SystemWalletRole, User, UserRole, UserStatus, Wallet, Withdrawal,
};
pub use events::DomainEvent;
pub use states::{
    deposit_transition, order_transition, payment_transition, settlement_transition,
    withdrawal_transition, DepositEvent, DepositStatus, OrderEvent, OrderStatus, PaymentEvent,
    PaymentStatus, SettlementEvent, SettlementStatus, WithdrawalEvent, WithdrawalStatus,
};
pub use value_objects::{Amount, DomainError, WalletAddress};
