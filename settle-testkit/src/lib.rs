//! Test Kit
//!
//! Shared helpers for integration tests: entity builders and a real
//! EIP-712 signer backed by a throwaway secp256k1 key.

mod helpers;

pub use helpers::{
    signed_verification, test_account, test_user, test_wallet, SignedVerification, TestSigner,
};
