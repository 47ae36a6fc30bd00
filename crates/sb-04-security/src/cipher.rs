//! # Message Encryption
//!
//! AEAD encryption of serialized payloads with per-party derived keys.
//!
//! ## Security Properties
//!
//! - **XChaCha20-Poly1305**: 192-bit nonce, constant-time ARX design. The
//!   default; random nonces are safe at any volume.
//! - **AES-256-GCM**: 96-bit nonce, for hosts with AES hardware support.
//! - **Fresh IV per call**: Nonces are drawn from the thread RNG on every
//!   encryption; they are never derived from the payload or reused.
//! - **Sign-then-verify**: `seal` attaches an HMAC over the envelope,
//!   `open` verifies it before the AEAD runs.

use std::sync::Arc;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use shared_types::wire::{CipherAlgorithm, EncryptedEnvelope};
use shared_types::Message;

use crate::keys::{Keyring, PartyKeys, SecretKey};
use crate::signing::{sign_envelope, verify_envelope};
use crate::SecurityError;

/// Generates a fresh random IV of the given length.
fn random_iv(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    bytes
}

/// Encrypts and decrypts payloads for specific peer contexts.
pub struct MessageCipher {
    keyring: Arc<dyn Keyring>,
    algorithm: CipherAlgorithm,
}

impl MessageCipher {
    /// Creates a cipher using `algorithm` for all outbound envelopes.
    pub fn new(keyring: Arc<dyn Keyring>, algorithm: CipherAlgorithm) -> Self {
        Self { keyring, algorithm }
    }

    /// The configured outbound algorithm.
    #[must_use]
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn keys_for(&self, party: &str) -> Result<PartyKeys, SecurityError> {
        self.keyring
            .party_keys(party)
            .ok_or_else(|| SecurityError::KeyUnavailable(party.to_string()))
    }

    /// Encrypts `plaintext` for `recipient` and signs the envelope.
    pub fn seal(
        &self,
        plaintext: &[u8],
        recipient: &str,
    ) -> Result<EncryptedEnvelope, SecurityError> {
        let keys = self.keys_for(recipient)?;
        let iv = random_iv(self.algorithm.nonce_len());

        let ciphertext = encrypt_raw(self.algorithm, &keys.cipher, &iv, plaintext)?;

        let mut envelope = EncryptedEnvelope::new(self.algorithm, iv, ciphertext);
        envelope.signature = Some(sign_envelope(&envelope, &keys.mac));
        Ok(envelope)
    }

    /// Verifies the envelope signature, then decrypts.
    ///
    /// The signature check uses the MAC key shared with `sender`; failure
    /// returns [`SecurityError::SignatureInvalid`] without attempting
    /// decryption.
    pub fn open(
        &self,
        envelope: &EncryptedEnvelope,
        sender: &str,
    ) -> Result<Vec<u8>, SecurityError> {
        let keys = self.keys_for(sender)?;

        if !verify_envelope(envelope, &keys.mac) {
            return Err(SecurityError::SignatureInvalid);
        }

        decrypt_raw(envelope.algorithm, &keys.cipher, &envelope.iv, &envelope.data)
    }

    /// Serializes and encrypts a whole message for `recipient`.
    pub fn encrypt_message(
        &self,
        message: &Message,
        recipient: &str,
    ) -> Result<EncryptedEnvelope, SecurityError> {
        let bytes = serde_json::to_vec(message)
            .map_err(|e| SecurityError::Encryption(e.to_string()))?;
        self.seal(&bytes, recipient)
    }

    /// Decrypts and deserializes a whole message from `sender`.
    pub fn decrypt_message(
        &self,
        envelope: &EncryptedEnvelope,
        sender: &str,
    ) -> Result<Message, SecurityError> {
        let bytes = self.open(envelope, sender)?;
        serde_json::from_slice(&bytes).map_err(|e| SecurityError::Decryption(e.to_string()))
    }
}

/// Encrypt plaintext with the selected AEAD.
fn encrypt_raw(
    algorithm: CipherAlgorithm,
    key: &SecretKey,
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, SecurityError> {
    match algorithm {
        CipherAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
            cipher
                .encrypt(XNonce::from_slice(iv), plaintext)
                .map_err(|e| SecurityError::Encryption(e.to_string()))
        }
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(iv), plaintext)
                .map_err(|e| SecurityError::Encryption(e.to_string()))
        }
    }
}

/// Decrypt ciphertext with the selected AEAD.
fn decrypt_raw(
    algorithm: CipherAlgorithm,
    key: &SecretKey,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SecurityError> {
    if iv.len() != algorithm.nonce_len() {
        return Err(SecurityError::Decryption(format!(
            "bad IV length {} for {:?}",
            iv.len(),
            algorithm
        )));
    }
    match algorithm {
        CipherAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
            cipher
                .decrypt(XNonce::from_slice(iv), ciphertext)
                .map_err(|e| SecurityError::Decryption(e.to_string()))
        }
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
                .map_err(|e| SecurityError::Decryption(e.to_string()))
        }
    }
}
