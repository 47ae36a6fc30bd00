//! # Wire Envelopes
//!
//! The serialized forms a message can take while crossing the transport
//! boundary, and the [`TransportFrame`] that carries them.
//!
//! ## Envelope Chain
//!
//! Outbound, the pipeline applies envelopes in a fixed order; inbound, the
//! order is reversed:
//!
//! ```text
//! Message --serialize--> Plain
//!         --(size >= threshold)--> Compressed
//!         --(metadata.encrypted)--> Encrypted
//!         --(frame too large)----> Chunk*
//! ```
//!
//! Discrimination on the receive side is structural: each envelope has a
//! distinct required field set, so `WirePayload` deserializes without a
//! type tag (with `Plain` as the explicit fallback variant).

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use uuid::Uuid;

use crate::message::{ContextKind, Message};

/// AEAD cipher used for an [`EncryptedEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CipherAlgorithm {
    /// XChaCha20-Poly1305 with a 24-byte nonce. The default.
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
    /// AES-256-GCM with a 12-byte nonce.
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// Nonce length in bytes for this cipher.
    #[must_use]
    pub fn nonce_len(&self) -> usize {
        match self {
            CipherAlgorithm::XChaCha20Poly1305 => 24,
            CipherAlgorithm::Aes256Gcm => 12,
        }
    }
}

/// Compression codec used for a [`CompressedEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    /// Zstandard block compression.
    #[default]
    #[serde(rename = "zstd")]
    Zstd,
}

/// A compressed payload with enough bookkeeping to audit the gain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedEnvelope {
    /// Structural marker; always `true` on the wire.
    pub compressed: bool,
    /// Codec that produced `data`.
    pub algorithm: CompressionAlgorithm,
    /// Size of the payload before compression.
    #[serde(rename = "originalSize")]
    pub original_size: usize,
    /// Size of `data`.
    #[serde(rename = "compressedSize")]
    pub compressed_size: usize,
    /// The compressed bytes.
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
}

impl CompressedEnvelope {
    /// Wraps compressed bytes produced by `algorithm`.
    #[must_use]
    pub fn new(algorithm: CompressionAlgorithm, original_size: usize, data: Vec<u8>) -> Self {
        Self {
            compressed: true,
            algorithm,
            original_size,
            compressed_size: data.len(),
            data,
        }
    }

    /// Compressed-to-original size ratio in `[0.0, 1.0]` for a useful result.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

/// An encrypted (and integrity-signed) payload.
///
/// The AEAD tag is folded into `data` by the cipher implementations; the
/// `tag` field exists for wire compatibility with peers that split it out.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Structural marker; always `true` on the wire.
    pub encrypted: bool,
    /// Cipher that produced `data`.
    pub algorithm: CipherAlgorithm,
    /// Per-message nonce. Never reused for a given key.
    #[serde_as(as = "Base64")]
    pub iv: Vec<u8>,
    /// Detached AEAD tag, when the peer splits it from the ciphertext.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
    /// Ciphertext (tag appended).
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
    /// HMAC-SHA256 over `algorithm ‖ iv ‖ data`, keyed per party pair.
    /// Verified BEFORE any decryption is attempted.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl EncryptedEnvelope {
    /// Wraps ciphertext produced with `algorithm` under `iv`.
    #[must_use]
    pub fn new(algorithm: CipherAlgorithm, iv: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            encrypted: true,
            algorithm,
            iv,
            tag: None,
            data,
            signature: None,
        }
    }

    /// The bytes covered by the integrity signature.
    #[must_use]
    pub fn signed_bytes(&self) -> Vec<u8> {
        let algorithm = match self.algorithm {
            CipherAlgorithm::XChaCha20Poly1305 => b"xchacha20-poly1305".as_slice(),
            CipherAlgorithm::Aes256Gcm => b"aes-256-gcm".as_slice(),
        };
        let mut out = Vec::with_capacity(algorithm.len() + self.iv.len() + self.data.len());
        out.extend_from_slice(algorithm);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.data);
        out
    }
}

/// One chunk of an oversized serialized payload.
///
/// Chunks of a message share `message_id`; indexes run `0..total_chunks`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    /// Id shared by all chunks of the original payload.
    #[serde(rename = "messageId")]
    pub message_id: Uuid,
    /// Zero-based position of this chunk.
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    /// Total number of chunks in the set.
    #[serde(rename = "totalChunks")]
    pub total_chunks: u32,
    /// This chunk's slice of the payload.
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
}

/// Every form a payload can take on the wire.
///
/// Variants are tried in declaration order; `Plain` is the fallback for
/// ordinary messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    /// Ciphertext envelope (possibly wrapping a compressed payload).
    Encrypted(EncryptedEnvelope),
    /// Compressed envelope.
    Compressed(CompressedEnvelope),
    /// One chunk of a larger payload.
    Chunk(ChunkEnvelope),
    /// An unwrapped message.
    Plain(Box<Message>),
}

impl WirePayload {
    /// Returns true for chunk frames.
    #[must_use]
    pub fn is_chunk(&self) -> bool {
        matches!(self, WirePayload::Chunk(_))
    }
}

/// Addressing for a [`TransportFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTarget {
    /// Deliver to every context except the origin.
    All,
    /// Deliver to the privileged background context only.
    Background,
    /// Deliver to one specific context id.
    Context(String),
}

impl FrameTarget {
    /// Whether a context should accept a frame with this target.
    ///
    /// Origin filtering (a context ignoring its own frames) happens separately;
    /// this only checks the addressing.
    #[must_use]
    pub fn accepts(&self, context_id: &str, kind: ContextKind) -> bool {
        match self {
            FrameTarget::All => true,
            FrameTarget::Background => kind == ContextKind::Background,
            FrameTarget::Context(id) => id == context_id,
        }
    }
}

/// The unit handed to the transport adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportFrame {
    /// Context id of the sender. Receivers drop their own frames and use this
    /// to select decryption keys and rate-limit buckets.
    pub origin: String,
    /// Addressing for this frame.
    pub target: FrameTarget,
    /// The enveloped payload.
    pub payload: WirePayload,
}

impl TransportFrame {
    /// A broadcast frame carrying an unwrapped message.
    #[must_use]
    pub fn plain(origin: impl Into<String>, message: Message) -> Self {
        Self {
            origin: origin.into(),
            target: FrameTarget::All,
            payload: WirePayload::Plain(Box::new(message)),
        }
    }

    /// A frame addressed to one context.
    #[must_use]
    pub fn to_context(origin: impl Into<String>, context: impl Into<String>, message: Message) -> Self {
        Self {
            origin: origin.into(),
            target: FrameTarget::Context(context.into()),
            payload: WirePayload::Plain(Box::new(message)),
        }
    }

    /// A frame addressed to the privileged background context.
    #[must_use]
    pub fn to_background(origin: impl Into<String>, message: Message) -> Self {
        Self {
            origin: origin.into(),
            target: FrameTarget::Background,
            payload: WirePayload::Plain(Box::new(message)),
        }
    }
}
