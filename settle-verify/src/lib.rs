//! Wallet Ownership Verification
//!
//! EIP-712 typed structured-data signatures over
//! `WalletVerification(address wallet, string nonce, uint256 timestamp)`
//! under the domain `{name: "B2B Settlement", version: "1", chainId,
//! verifyingContract}`, with timestamp freshness and at-most-once nonce
//! consumption through the nonce store.

mod error;
mod recover;
mod typed_data;
mod verifier;

pub use error::VerifyError;
pub use recover::{parse_signature, recover_signer, signer_address};
pub use typed_data::{domain_separator, message_hash, verification_digest, DOMAIN_NAME, DOMAIN_VERSION};
pub use verifier::{VerificationMessage, VerifyConfig, WalletVerifier};
