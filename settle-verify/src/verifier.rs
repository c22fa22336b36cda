//! Ownership Verifier
//!
//! Orchestrates a verification attempt in a fixed order: address syntax,
//! timestamp window, nonce reservation, signature recovery. The nonce is
//! released on a failed recovery so a legitimate client may retry with the
//! same nonce, and marked used on success (at-most-once).

use crate::error::VerifyError;
use crate::recover::recover_signer;
use crate::typed_data::{address_bytes, verification_digest};
use chrono::Utc;
use settle_kv::NonceStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default allowed drift between the signed timestamp and server time.
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

/// EIP-712 domain parameters and the freshness window.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub chain_id: u64,
    pub verifying_contract: String,
    pub timestamp_tolerance: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            verifying_contract: "0x0000000000000000000000000000000000000000".to_string(),
            timestamp_tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        }
    }
}

/// The message the client signed.
#[derive(Debug, Clone)]
pub struct VerificationMessage {
    pub wallet: String,
    pub nonce: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// Verifies wallet ownership against a nonce store.
pub struct WalletVerifier {
    config: VerifyConfig,
    nonce_store: Arc<dyn NonceStore>,
}

impl WalletVerifier {
    pub fn new(config: VerifyConfig, nonce_store: Arc<dyn NonceStore>) -> Self {
        Self { config, nonce_store }
    }

    /// Full verification with timestamp and nonce handling.
    ///
    /// Order matters: the timestamp is checked before the nonce is reserved,
    /// so an expired signature leaves the nonce untouched.
    pub async fn verify_ownership(
        &self,
        address: &str,
        message: &VerificationMessage,
        signature: &[u8; 65],
    ) -> Result<(), VerifyError> {
        // 1. Address syntax
        address_bytes(address).map_err(|_| VerifyError::InvalidAddress)?;

        // 2. Timestamp freshness
        self.validate_timestamp(message.timestamp)?;

        // 3. Reserve the nonce (replay defense)
        self.nonce_store.reserve(address, &message.nonce).await.map_err(|err| {
            warn!(address, nonce = %message.nonce, error = %err, "Nonce reservation failed");
            VerifyError::from(err)
        })?;

        // 4. Recover and compare
        match self.verify_signature_only(address, message, signature) {
            Ok(true) => {}
            outcome => {
                // Release so the same nonce can back a legitimate retry.
                if let Err(release_err) =
                    self.nonce_store.release(address, &message.nonce).await
                {
                    error!(
                        address,
                        error = %release_err,
                        "Failed to release nonce after verification failure"
                    );
                }
                return match outcome {
                    Ok(false) => Err(VerifyError::AddressMismatch),
                    Err(err) => Err(err),
                    Ok(true) => unreachable!(),
                };
            }
        }

        // 5. Pin the nonce as consumed. Verification already succeeded;
        //    a store failure here is logged, not surfaced.
        if let Err(err) = self.nonce_store.mark_used(address, &message.nonce).await {
            error!(address, error = %err, "Failed to mark nonce as used");
        }

        debug!(address, "Wallet ownership verified");
        Ok(())
    }

    /// Cryptographic check only, no nonce handling. Returns whether the
    /// recovered signer matches the claimed address (case-insensitive).
    pub fn verify_signature_only(
        &self,
        address: &str,
        message: &VerificationMessage,
        signature: &[u8; 65],
    ) -> Result<bool, VerifyError> {
        if message.timestamp < 0 {
            return Err(VerifyError::InvalidSignature);
        }

        let digest = verification_digest(
            self.config.chain_id,
            &self.config.verifying_contract,
            &message.wallet,
            &message.nonce,
            message.timestamp as u64,
        )?;

        let recovered = recover_signer(&digest, signature)?;
        let claimed = address_bytes(address)?;

        Ok(recovered == claimed)
    }

    fn validate_timestamp(&self, timestamp: i64) -> Result<(), VerifyError> {
        let now = Utc::now().timestamp();
        let tolerance = self.config.timestamp_tolerance.as_secs() as i64;

        if timestamp < now - tolerance {
            return Err(VerifyError::SignatureExpired);
        }
        if timestamp > now + tolerance {
            return Err(VerifyError::SignatureFuture);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::signer_address;
    use k256::ecdsa::SigningKey;
    use settle_kv::MemoryNonceStore;

    struct TestWallet {
        key: SigningKey,
        address: String,
    }

    fn new_wallet() -> TestWallet {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address_bytes = signer_address(key.verifying_key());
        let mut address = String::from("0x");
        for b in address_bytes {
            address.push_str(&format!("{:02x}", b));
        }
        TestWallet { key, address }
    }

    fn sign_message(wallet: &TestWallet, config: &VerifyConfig, message: &VerificationMessage) -> [u8; 65] {
        let digest = verification_digest(
            config.chain_id,
            &config.verifying_contract,
            &message.wallet,
            &message.nonce,
            message.timestamp as u64,
        )
        .unwrap();

        let (sig, recid) = wallet.key.sign_prehash_recoverable(&digest).unwrap();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        out
    }

    fn verifier() -> (WalletVerifier, Arc<MemoryNonceStore>) {
        let store = Arc::new(MemoryNonceStore::new());
        let verifier = WalletVerifier::new(VerifyConfig::default(), store.clone());
        (verifier, store)
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let (verifier, _) = verifier();
        let wallet = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let signature = sign_message(&wallet, &VerifyConfig::default(), &message);

        verifier.verify_ownership(&wallet.address, &message, &signature).await.unwrap();
    }

    #[tokio::test]
    async fn test_replay_same_nonce_rejected() {
        let (verifier, _) = verifier();
        let wallet = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let signature = sign_message(&wallet, &VerifyConfig::default(), &message);

        verifier.verify_ownership(&wallet.address, &message, &signature).await.unwrap();

        let err = verifier
            .verify_ownership(&wallet.address, &message, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::NonceReused));
    }

    #[tokio::test]
    async fn test_expired_timestamp_leaves_nonce_untouched() {
        let (verifier, store) = verifier();
        let wallet = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp() - 600,
        };
        let signature = sign_message(&wallet, &VerifyConfig::default(), &message);

        let err = verifier
            .verify_ownership(&wallet.address, &message, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::SignatureExpired));

        // The timestamp check runs before reservation, so the nonce is free.
        store.reserve(&wallet.address, "n1").await.unwrap();
    }

    #[tokio::test]
    async fn test_future_timestamp_rejected() {
        let (verifier, _) = verifier();
        let wallet = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp() + 600,
        };
        let signature = sign_message(&wallet, &VerifyConfig::default(), &message);

        let err = verifier
            .verify_ownership(&wallet.address, &message, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::SignatureFuture));
    }

    #[tokio::test]
    async fn test_wrong_signer_releases_nonce() {
        let (verifier, _) = verifier();
        let wallet = new_wallet();
        let intruder = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp(),
        };
        // Signed by a different key than the claimed wallet.
        let signature = sign_message(&intruder, &VerifyConfig::default(), &message);

        let err = verifier
            .verify_ownership(&wallet.address, &message, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::AddressMismatch));

        // The nonce was released; the legitimate owner can retry with it.
        let signature = sign_message(&wallet, &VerifyConfig::default(), &message);
        verifier.verify_ownership(&wallet.address, &message, &signature).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_first() {
        let (verifier, _) = verifier();
        let message = VerificationMessage {
            wallet: "0x123".to_string(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp(),
        };

        let err = verifier
            .verify_ownership("0x123", &message, &[0u8; 65])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidAddress));
    }

    #[tokio::test]
    async fn test_digest_binds_domain_chain_id() {
        // A signature produced for another chain id must not verify.
        let (verifier, _) = verifier();
        let wallet = new_wallet();

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: "n1".to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let foreign_config = VerifyConfig { chain_id: 1, ..VerifyConfig::default() };
        let signature = sign_message(&wallet, &foreign_config, &message);

        let err = verifier
            .verify_ownership(&wallet.address, &message, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::AddressMismatch | VerifyError::InvalidSignature));
    }
}
