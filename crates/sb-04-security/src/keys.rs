//! # Key Material
//!
//! Symmetric per-party keys derived from one master secret. Both ends of a
//! context pair derive identical keys, so there is no key exchange; the
//! master secret is provisioned by the host application.
//!
//! Two keys are derived per party with distinct labels so the cipher key and
//! the MAC key are never the same bytes.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::collections::HashMap;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Pseudo-party label used for frames addressed to every context at once.
pub const BROADCAST_PARTY: &str = "broadcast";

/// Secret key (256-bit).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never reach logs
        f.write_str("SecretKey(..)")
    }
}

/// The key pair shared with one peer context.
#[derive(Clone)]
pub struct PartyKeys {
    /// AEAD encryption key.
    pub cipher: SecretKey,
    /// Envelope-signature key.
    pub mac: SecretKey,
}

/// Source of per-party key material.
///
/// Implementations might derive keys from a master secret, read them from
/// host-managed storage, or query a key service.
pub trait Keyring: Send + Sync {
    /// Returns the keys shared with `party`, or `None` if the party is
    /// unknown (callers must reject the message).
    fn party_keys(&self, party: &str) -> Option<PartyKeys>;
}

/// A keyring that derives (and caches) party keys from a master secret.
///
/// Derivation is `HMAC-SHA256(master, label ":" party)` with the labels
/// `cipher` and `mac`.
pub struct DerivedKeyring {
    master_secret: Vec<u8>,
    cache: Mutex<HashMap<String, PartyKeys>>,
}

impl DerivedKeyring {
    /// Creates a keyring over the given master secret.
    pub fn new(master_secret: Vec<u8>) -> Self {
        Self {
            master_secret,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn derive(&self, label: &str, party: &str) -> SecretKey {
        let mut mac =
            HmacSha256::new_from_slice(&self.master_secret).expect("HMAC can take key of any size");
        mac.update(label.as_bytes());
        mac.update(b":");
        mac.update(party.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        SecretKey::from_bytes(bytes)
    }
}

impl Keyring for DerivedKeyring {
    fn party_keys(&self, party: &str) -> Option<PartyKeys> {
        let mut cache = self.cache.lock();
        if let Some(keys) = cache.get(party) {
            return Some(keys.clone());
        }

        let keys = PartyKeys {
            cipher: self.derive("cipher", party),
            mac: self.derive("mac", party),
        };
        cache.insert(party.to_string(), keys.clone());
        Some(keys)
    }
}
