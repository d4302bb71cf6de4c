//! Wallet signature verification
//!
//! Recovers the signer of an EIP-191 personal message from a secp256k1
//! signature and compares it to the claimed wallet address.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors that can occur during signature handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid wallet address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

/// Length of an `0x`-prefixed hex address
const ADDRESS_LEN: usize = 42;

/// r (32) + s (32) + v (1)
const SIGNATURE_LEN: usize = 65;

/// Validate a wallet address and return its canonical lowercase form
pub fn normalize_address(address: &str) -> Result<String, CryptoError> {
    let address = address.trim();

    if address.len() != ADDRESS_LEN {
        return Err(CryptoError::InvalidAddressFormat(format!(
            "Expected {} characters, got {}",
            ADDRESS_LEN,
            address.len()
        )));
    }

    let Some(hex_part) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return Err(CryptoError::InvalidAddressFormat(
            "Address must start with 0x".to_string(),
        ));
    };

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidAddressFormat(
            "Address must be hexadecimal".to_string(),
        ));
    }

    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// Compute Keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a message the way wallets do for `personal_sign`
///
/// Format: "\x19Ethereum Signed Message:\n" + len(message) + message
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let prefixed = format!("\x19Ethereum Signed Message:\n{}{}", message.len(), message);
    keccak256(prefixed.as_bytes())
}

/// Derive the lowercase wallet address of a public key
pub fn address_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover the signing address of a personal message
///
/// # Arguments
/// * `message` - The exact text the wallet signed
/// * `signature` - Hex-encoded 65-byte signature, `0x` prefix optional
///
/// # Returns
/// * `Ok(address)` lowercase, `0x`-prefixed
/// * `Err(CryptoError::MalformedSignature)` if the signature cannot be decoded
///   or no public key can be recovered from it
pub fn recover_address(message: &str, signature: &str) -> Result<String, CryptoError> {
    let signature = signature.trim();
    let hex_part = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);

    let bytes = hex::decode(hex_part)
        .map_err(|e| CryptoError::MalformedSignature(format!("Invalid hex: {}", e)))?;

    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::MalformedSignature(format!(
            "Expected {} bytes, got {}",
            SIGNATURE_LEN,
            bytes.len()
        )));
    }

    // Wallets emit v as 27/28; some libraries emit the raw 0/1 parity
    let v = bytes[64];
    let parity = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        _ => {
            return Err(CryptoError::MalformedSignature(format!(
                "Invalid recovery byte: {}",
                v
            )))
        }
    };

    let recovery_id = RecoveryId::from_byte(parity).ok_or_else(|| {
        CryptoError::MalformedSignature(format!("Invalid recovery id: {}", parity))
    })?;

    let sig = Signature::from_slice(&bytes[..64])
        .map_err(|e| CryptoError::MalformedSignature(format!("Invalid signature: {}", e)))?;

    let prehash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| CryptoError::MalformedSignature(format!("Recovery failed: {}", e)))?;

    Ok(address_from_key(&key))
}

/// Verify that `claimed_address` signed `message`
///
/// # Returns
/// * `Ok(true)` if the recovered signer matches (case-insensitive)
/// * `Ok(false)` if a signer was recovered but it is someone else
/// * `Err(CryptoError::MalformedSignature)` if nothing could be recovered
pub fn verify_wallet_signature(
    message: &str,
    signature: &str,
    claimed_address: &str,
) -> Result<bool, CryptoError> {
    let recovered = recover_address(message, signature)?;
    Ok(recovered.eq_ignore_ascii_case(claimed_address.trim()))
}
