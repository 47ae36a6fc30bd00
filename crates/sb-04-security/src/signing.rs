//! # Envelope Signing
//!
//! HMAC-SHA256 integrity signatures over encrypted envelopes. Verification
//! happens BEFORE any decryption attempt; a frame that fails here is dropped
//! without touching the ciphertext.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared_types::wire::EncryptedEnvelope;

use crate::keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Signs arbitrary bytes, returning the 32-byte HMAC.
pub fn sign_bytes(message_bytes: &[u8], key: &SecretKey) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message_bytes);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies an HMAC over arbitrary bytes.
///
/// Uses constant-time comparison to prevent timing attacks.
#[must_use]
pub fn verify_bytes(message_bytes: &[u8], signature: &[u8], key: &SecretKey) -> bool {
    let mut mac = match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(message_bytes);
    mac.verify_slice(signature).is_ok()
}

/// Computes the signature for an encrypted envelope.
///
/// The signature covers `algorithm ‖ iv ‖ ciphertext`, so neither the cipher
/// choice nor the nonce can be swapped without detection.
pub fn sign_envelope(envelope: &EncryptedEnvelope, mac_key: &SecretKey) -> Vec<u8> {
    sign_bytes(&envelope.signed_bytes(), mac_key)
}

/// Verifies an envelope's signature. An absent signature never verifies.
#[must_use]
pub fn verify_envelope(envelope: &EncryptedEnvelope, mac_key: &SecretKey) -> bool {
    match &envelope.signature {
        Some(signature) => verify_bytes(&envelope.signed_bytes(), signature, mac_key),
        None => false,
    }
}
