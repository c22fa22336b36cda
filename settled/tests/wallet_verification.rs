//! Wallet verification scenarios against the in-memory nonce store.

use chrono::Utc;
use settle_kv::{MemoryNonceStore, NonceStore};
use settle_testkit::{signed_verification, TestSigner};
use settle_verify::{VerificationMessage, VerifyConfig, VerifyError, WalletVerifier};
use std::sync::Arc;

fn setup() -> (WalletVerifier, Arc<MemoryNonceStore>, TestSigner) {
    let store = Arc::new(MemoryNonceStore::new());
    let verifier = WalletVerifier::new(VerifyConfig::default(), store.clone());
    (verifier, store, TestSigner::random())
}

#[tokio::test]
async fn successful_verification_then_replay_is_nonce_reused() {
    // S1: a fresh signed message verifies; replaying the exact same
    // signature fails on the consumed nonce.
    let (verifier, _, signer) = setup();
    let signed = signed_verification(&signer, &VerifyConfig::default(), "n1");

    verifier
        .verify_ownership(&signer.address, &signed.message, &signed.signature)
        .await
        .expect("first verification succeeds");

    let err = verifier
        .verify_ownership(&signer.address, &signed.message, &signed.signature)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::NonceReused));
}

#[tokio::test]
async fn expired_signature_rejected_before_nonce_reservation() {
    // S2: timestamp 10 minutes old fails SignatureExpired and leaves the
    // nonce free for a fresh attempt.
    let (verifier, store, signer) = setup();

    let message = VerificationMessage {
        wallet: signer.address.clone(),
        nonce: "n1".to_string(),
        timestamp: Utc::now().timestamp() - 600,
    };
    let digest = settle_verify::verification_digest(
        31337,
        "0x0000000000000000000000000000000000000000",
        &message.wallet,
        &message.nonce,
        message.timestamp as u64,
    )
    .unwrap();
    let signature = signer.sign_digest(&digest);

    let err = verifier
        .verify_ownership(&signer.address, &message, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::SignatureExpired));

    // No reservation happened.
    store.reserve(&signer.address, "n1").await.expect("nonce untouched");
}

#[tokio::test]
async fn hex_signature_roundtrip_matches_client_submission() {
    // The signature survives the hex rendering a client would submit.
    let (verifier, _, signer) = setup();
    let signed = signed_verification(&signer, &VerifyConfig::default(), "n-hex");

    let parsed = settle_verify::parse_signature(&signed.signature_hex).unwrap();
    assert_eq!(parsed, signed.signature);

    verifier
        .verify_ownership(&signer.address, &signed.message, &parsed)
        .await
        .expect("verification succeeds from hex form");
}

#[tokio::test]
async fn foreign_signer_cannot_claim_wallet() {
    let (verifier, _, owner) = setup();
    let attacker = TestSigner::random();

    // The attacker signs a message claiming the owner's wallet.
    let mut signed = signed_verification(&attacker, &VerifyConfig::default(), "n2");
    signed.message.wallet = owner.address.clone();

    // Recompute over the owner's wallet field, still with the attacker key.
    let digest = settle_verify::verification_digest(
        31337,
        "0x0000000000000000000000000000000000000000",
        &signed.message.wallet,
        &signed.message.nonce,
        signed.message.timestamp as u64,
    )
    .unwrap();
    let signature = attacker.sign_digest(&digest);

    let err = verifier
        .verify_ownership(&owner.address, &signed.message, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::AddressMismatch));

    // The owner can still verify with the same nonce afterwards.
    let legit = signed_verification(&owner, &VerifyConfig::default(), "n2");
    verifier
        .verify_ownership(&owner.address, &legit.message, &legit.signature)
        .await
        .expect("nonce released for the legitimate owner");
}
