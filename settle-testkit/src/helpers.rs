//! Builders and signing helpers for tests.

use chrono::Utc;
use k256::ecdsa::SigningKey;
use rust_decimal::Decimal;
use settle_domain::entities::{
    Account, AccountStatus, AccountType, KycStatus, User, UserRole, UserStatus, Wallet,
};
use settle_verify::{
    signer_address, verification_digest, VerificationMessage, VerifyConfig,
};
use uuid::Uuid;

/// A throwaway wallet keypair with its derived address.
pub struct TestSigner {
    key: SigningKey,
    /// Lower-cased 0x address derived from the public key
    pub address: String,
}

impl TestSigner {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::thread_rng());
        let bytes = signer_address(key.verifying_key());

        let mut address = String::from("0x");
        for b in bytes {
            address.push_str(&format!("{:02x}", b));
        }

        Self { key, address }
    }

    /// Sign a prehashed digest, returning the 65-byte `r || s || v`
    /// signature with v in the 27/28 convention.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> [u8; 65] {
        let (sig, recid) = self.key.sign_prehash_recoverable(digest).expect("signing failed");
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        out
    }
}

/// A wallet-verification request signed by `signer`.
pub struct SignedVerification {
    pub message: VerificationMessage,
    pub signature: [u8; 65],
    /// Hex rendering as a client would submit it
    pub signature_hex: String,
}

/// Produce a valid signed verification for the signer's own address.
pub fn signed_verification(
    signer: &TestSigner,
    config: &VerifyConfig,
    nonce: &str,
) -> SignedVerification {
    let message = VerificationMessage {
        wallet: signer.address.clone(),
        nonce: nonce.to_string(),
        timestamp: Utc::now().timestamp(),
    };

    let digest = verification_digest(
        config.chain_id,
        &config.verifying_contract,
        &message.wallet,
        &message.nonce,
        message.timestamp as u64,
    )
    .expect("valid digest inputs");

    let signature = signer.sign_digest(&digest);
    let signature_hex = format!("0x{}", hex_encode(&signature));

    SignedVerification { message, signature, signature_hex }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// An active buyer with no KYC.
pub fn test_user(id: i64) -> User {
    let now = Utc::now();
    User {
        id,
        external_id: Uuid::new_v4(),
        email: format!("user{}@example.com", id),
        name: format!("User {}", id),
        role: UserRole::Buyer,
        kyc_status: KycStatus::None,
        kyc_verified_at: None,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// An unverified, non-primary wallet owned by `user_id`.
pub fn test_wallet(id: i64, user_id: i64, address: &str) -> Wallet {
    let now = Utc::now();
    Wallet {
        id,
        external_id: Uuid::new_v4(),
        user_id,
        address: address.to_lowercase(),
        label: None,
        is_primary: false,
        is_verified: false,
        verified_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// An active user account with the given available balance.
pub fn test_account(id: i64, owner_id: i64, available: Decimal) -> Account {
    let now = Utc::now();
    Account {
        id,
        external_id: Uuid::new_v4(),
        account_type: AccountType::User,
        owner_id: Some(owner_id),
        primary_wallet_id: None,
        available_balance: available,
        held_balance: Decimal::ZERO,
        version: 0,
        status: AccountStatus::Active,
        created_at: now,
        updated_at: now,
    }
}
