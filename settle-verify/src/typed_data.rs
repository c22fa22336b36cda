//! EIP-712 Typed Structured Data Hashing
//!
//! Builds the signing digest for the wallet verification message:
//! `keccak256(0x19 0x01 || domainSeparator || hashStruct(message))`.
//! Encoding follows the EIP-712 rules: every field is ABI-encoded to a
//! 32-byte word; dynamic strings enter as their keccak hash.

use crate::error::VerifyError;
use sha3::{Digest, Keccak256};

/// EIP-712 domain name for this service.
pub const DOMAIN_NAME: &str = "B2B Settlement";
/// EIP-712 domain version.
pub const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const MESSAGE_TYPE: &str = "WalletVerification(address wallet,string nonce,uint256 timestamp)";

/// Keccak-256 convenience wrapper.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&out);
    hash
}

/// Left-pad a u64 into a 32-byte ABI word.
fn encode_uint(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Left-pad 20 address bytes into a 32-byte ABI word.
fn encode_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Parse a `0x`-prefixed 40-hex-char address into its 20 bytes.
pub fn address_bytes(address: &str) -> Result<[u8; 20], VerifyError> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or(VerifyError::InvalidAddress)?;

    if hex_part.len() != 40 {
        return Err(VerifyError::InvalidAddress);
    }

    let raw = hex::decode(hex_part).map_err(|_| VerifyError::InvalidAddress)?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// hashStruct of the EIP712Domain.
pub fn domain_separator(chain_id: u64, verifying_contract: &str) -> Result<[u8; 32], VerifyError> {
    let contract = address_bytes(verifying_contract)?;

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
    encoded.extend_from_slice(&keccak256(DOMAIN_NAME.as_bytes()));
    encoded.extend_from_slice(&keccak256(DOMAIN_VERSION.as_bytes()));
    encoded.extend_from_slice(&encode_uint(chain_id));
    encoded.extend_from_slice(&encode_address(&contract));

    Ok(keccak256(&encoded))
}

/// hashStruct of the WalletVerification message.
pub fn message_hash(wallet: &str, nonce: &str, timestamp: u64) -> Result<[u8; 32], VerifyError> {
    let wallet = address_bytes(wallet)?;

    let mut encoded = Vec::with_capacity(4 * 32);
    encoded.extend_from_slice(&keccak256(MESSAGE_TYPE.as_bytes()));
    encoded.extend_from_slice(&encode_address(&wallet));
    encoded.extend_from_slice(&keccak256(nonce.as_bytes()));
    encoded.extend_from_slice(&encode_uint(timestamp));

    Ok(keccak256(&encoded))
}

/// The final signing digest. Byte-level concatenation, not string concat:
/// `0x19 0x01 || domainSeparator || messageHash`.
pub fn verification_digest(
    chain_id: u64,
    verifying_contract: &str,
    wallet: &str,
    nonce: &str,
    timestamp: u64,
) -> Result<[u8; 32], VerifyError> {
    let domain = domain_separator(chain_id, verifying_contract)?;
    let message = message_hash(wallet, nonce, timestamp)?;

    let mut raw = Vec::with_capacity(2 + 32 + 32);
    raw.extend_from_slice(&[0x19, 0x01]);
    raw.extend_from_slice(&domain);
    raw.extend_from_slice(&message);

    Ok(keccak256(&raw))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x0000000000000000000000000000000000000000";
    const WALLET: &str = "0xabc0000000000000000000000000000000000001";

    #[test]
    fn test_digest_is_deterministic() {
        let a = verification_digest(31337, CONTRACT, WALLET, "n1", 1700000000).unwrap();
        let b = verification_digest(31337, CONTRACT, WALLET, "n1", 1700000000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_binds_every_field() {
        let base = verification_digest(31337, CONTRACT, WALLET, "n1", 1700000000).unwrap();

        let other_chain = verification_digest(1, CONTRACT, WALLET, "n1", 1700000000).unwrap();
        let other_nonce = verification_digest(31337, CONTRACT, WALLET, "n2", 1700000000).unwrap();
        let other_time = verification_digest(31337, CONTRACT, WALLET, "n1", 1700000001).unwrap();
        let other_wallet = verification_digest(
            31337,
            CONTRACT,
            "0xabc0000000000000000000000000000000000002",
            "n1",
            1700000000,
        )
        .unwrap();

        for other in [other_chain, other_nonce, other_time, other_wallet] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_domain_separator_known_type_hash() {
        // The domain type hash is the well-known EIP-712 constant.
        let type_hash = keccak256(DOMAIN_TYPE.as_bytes());
        assert_eq!(
            hex::encode(type_hash),
            "8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f"
        );
    }

    #[test]
    fn test_address_bytes_rejects_malformed() {
        assert!(address_bytes("abc").is_err());
        assert!(address_bytes("0x123").is_err());
        assert!(address_bytes("0xzzz0000000000000000000000000000000000001").is_err());
        assert!(address_bytes(WALLET).is_ok());
    }
}
