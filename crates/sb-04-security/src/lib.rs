//! # Subsystem 4: Security Layer
//!
//! The single, authoritative implementation of all wire-security logic for
//! the broker. Every subsystem uses this crate instead of rolling its own
//! checks, so policy changes propagate everywhere at once.
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `keys` | Per-party key derivation from a master secret |
//! | `cipher` | AEAD encryption (XChaCha20-Poly1305, AES-256-GCM) |
//! | `signing` | HMAC-SHA256 envelope signatures |
//! | `replay` | Timestamp windows and seen-message replay prevention |
//! | `sanitize` | Recursive scrubbing of untrusted payload strings |
//! | `rate_limit` | Fixed-window per-sender rate limiting |
//!
//! ## Security Properties
//!
//! - **Fresh IVs**: Every encryption call draws a new random nonce.
//! - **Verify Before Decrypt**: Envelope signatures are checked first; a bad
//!   signature fails closed without touching the ciphertext.
//! - **Time-Bounded Validity**: Messages outside the timestamp window are
//!   rejected; seen ids are cached for twice the window.

pub mod cipher;
pub mod keys;
pub mod rate_limit;
pub mod replay;
pub mod sanitize;
pub mod signing;

pub use cipher::MessageCipher;
pub use keys::{DerivedKeyring, Keyring, PartyKeys, SecretKey, BROADCAST_PARTY};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitConfig};
pub use replay::{validate_timestamp, ReplayGuard, MAX_FUTURE_SKEW_MS, REPLAY_CACHE_TTL_MS};
pub use sanitize::sanitize_value;
pub use signing::{sign_bytes, verify_bytes};

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the security layer.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, corrupt ciphertext, bad tag).
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The envelope signature did not verify. Checked before decryption.
    #[error("Invalid envelope signature")]
    SignatureInvalid,

    /// No key material is available for the requested party.
    #[error("No key material for party '{0}'")]
    KeyUnavailable(String),

    /// Message timestamp is outside the valid window.
    #[error("Timestamp out of range: {timestamp} not within window at {now}")]
    TimestampOutOfRange { timestamp: u64, now: u64 },

    /// Message id has already been accepted (replay).
    #[error("Replay detected: message {message_id} already seen")]
    Replay { message_id: Uuid },

    /// Sender exceeded its rate-limit window.
    #[error("Rate limit exceeded for sender '{sender}': {max_requests} per window")]
    RateLimitExceeded { sender: String, max_requests: u32 },
}
