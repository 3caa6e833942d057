//! Pure cryptographic primitives used by the ledger: content hashing,
//! HMAC chaining between entries, and Ed25519 signing/verification.
//!
//! This crate has no knowledge of ledger entries, tables, or rows — it only
//! operates on bytes. Domain separation between hash purposes is done with
//! fixed-prefix tags so that, e.g., an entry hash can never collide with a
//! checkpoint digest over the same bytes.

#![deny(unsafe_code)]

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Domain-separation tags, one per hashing purpose in this system.
pub mod domains {
    /// Ledger entry content hash.
    pub const LEDGER: &[u8] = b"sync:ledger\n";
    /// Checkpoint digest.
    pub const CHECKPOINT: &[u8] = b"sync:checkpoint\n";
}

/// Errors surfaced by this crate.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("signature verification failed")]
    SignatureVerification,
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// The fixed genesis `prev_hash` for sequence 1 of any ledger (invariant 5).
///
/// 64 lowercase hex zero characters — the natural hex width of a 32-byte
/// BLAKE3/HMAC-SHA256 digest, used uniformly as the one canonical genesis
/// value in this codebase.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// BLAKE3 content hash of `bytes`, tagged with `domain`, hex-encoded.
pub fn hash_tagged(domain: &[u8], bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    hasher.update(bytes);
    hex::encode(hasher.finalize().as_bytes())
}

/// HMAC-SHA256 of `bytes` keyed by `key`, hex-encoded. Used to chain ledger
/// entries: `entry.prev_hash == hmac_chain(hmac_key, previous_entry_canonical_bytes)`.
pub fn hmac_chain(key: &[u8], bytes: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign `message` with `signing_key`, returning a hex-encoded Ed25519 signature.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> String {
    hex::encode(signing_key.sign(message).to_bytes())
}

/// Verify a hex-encoded Ed25519 signature over `message` by the hex-encoded public key.
pub fn verify(pubkey_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let pubkey_bytes = hex::decode(pubkey_hex)?;
    let pubkey_arr: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| KernelError::InvalidKey("public key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_arr)
        .map_err(|e| KernelError::InvalidKey(e.to_string()))?;

    let sig_bytes = hex::decode(signature_hex)?;
    let sig_arr: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| KernelError::InvalidKey("signature must be 64 bytes".into()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_arr);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| KernelError::SignatureVerification)
}

/// Generate a fresh Ed25519 keypair, returning (hex pubkey, signing key).
pub fn generate_keypair() -> (String, SigningKey) {
    let mut rng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut rng);
    let pubkey_hex = hex::encode(signing_key.verifying_key().to_bytes());
    (pubkey_hex, signing_key)
}

/// Derive the hex public key from a signing key.
pub fn pubkey_from_signing_key(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_tagged_is_deterministic() {
        let a = hash_tagged(domains::LEDGER, b"hello");
        let b = hash_tagged(domains::LEDGER, b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_tagged_domain_separates() {
        let a = hash_tagged(domains::LEDGER, b"hello");
        let b = hash_tagged(domains::CHECKPOINT, b"hello");
        assert_ne!(a, b);
    }

    #[test]
    fn hmac_chain_is_deterministic_and_key_sensitive() {
        let a = hmac_chain(b"key-a", b"payload");
        let b = hmac_chain(b"key-a", b"payload");
        let c = hmac_chain(b"key-b", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (pubkey, signing_key) = generate_keypair();
        let sig = sign(&signing_key, b"a message");
        assert!(verify(&pubkey, b"a message", &sig).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let (pubkey, signing_key) = generate_keypair();
        let sig = sign(&signing_key, b"a message");
        assert!(verify(&pubkey, b"a different message", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let (_pubkey, signing_key) = generate_keypair();
        let (other_pubkey, _) = generate_keypair();
        let sig = sign(&signing_key, b"a message");
        assert!(verify(&other_pubkey, b"a message", &sig).is_err());
    }

    #[test]
    fn genesis_hash_is_64_hex_chars() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}
