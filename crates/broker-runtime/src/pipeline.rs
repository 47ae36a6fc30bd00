//! # Wire Pipeline
//!
//! Everything that happens to a message between the bus and the raw
//! transport. The pipeline wraps the host transport adapter; the bus and the
//! router talk to the pipeline as if it were the transport itself.
//!
//! ## Outbound
//!
//! | Stage       | Applied when                                    |
//! |-------------|-------------------------------------------------|
//! | Compression | payload at/above threshold and worth the gain   |
//! | Encryption  | the message's metadata demands it               |
//! | Chunking    | the serialized frame exceeds the chunk size     |
//!
//! Compression runs before encryption so the cipher sees the smaller form
//! (ciphertext does not compress). Chunking always runs last, over whatever
//! the earlier stages produced.
//!
//! ## Inbound
//!
//! Frames are unwrapped in reverse (reassemble, decrypt, decompress), then
//! policy-checked: per-sender rate limit, timestamp freshness, replay
//! rejection, and payload sanitization for senders in untrusted contexts.
//! A frame failing any stage is dropped and counted; it never reaches the
//! bus partially processed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use sb_04_security::{
    sanitize_value, validate_timestamp, FixedWindowRateLimiter, MessageCipher, RateLimitConfig,
    ReplayGuard, SecurityError, BROADCAST_PARTY,
};
use sb_05_compression::{split_into_chunks, ChunkAssembler, CompressionConfig, ZstdCompressor};
use shared_types::{
    FrameTarget, Message, TransportAdapter, TransportError, TransportFrame, WirePayload,
};
use switchboard_telemetry::metrics::{COMPRESSION_BYTES_SAVED, FRAMES_DROPPED, FRAMES_SENT};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Wire pipeline tuning, assembled by the broker from its own config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Outbound compression and chunk sizing.
    pub compression: CompressionConfig,
    /// Inbound per-sender rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Inbound messages older than this are dropped.
    pub max_message_age_ms: u64,
    /// Partial chunk sets older than this are evicted.
    pub chunk_max_age_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_message_age_ms: 60_000,
            chunk_max_age_ms: 30_000,
        }
    }
}

// =============================================================================
// DROP ACCOUNTING
// =============================================================================

/// Why an inbound frame never made it to the bus. Doubles as the metrics
/// label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropReason {
    Signature,
    Decrypt,
    Decompress,
    Decode,
    Timestamp,
    Replay,
    RateLimit,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            DropReason::Signature => "signature",
            DropReason::Decrypt => "decrypt",
            DropReason::Decompress => "decompress",
            DropReason::Decode => "decode",
            DropReason::Timestamp => "timestamp",
            DropReason::Replay => "replay",
            DropReason::RateLimit => "rate_limit",
        }
    }
}

/// Key-derivation party label for a frame addressed to `target`.
///
/// The label travels implicitly with the frame: both ends derive it from the
/// target field, so the sealing and the opening side always agree. Addressed
/// frames use the destination context id, broadcast frames the shared
/// broadcast label.
fn recipient_party(target: &FrameTarget) -> &str {
    match target {
        FrameTarget::Context(id) => id.as_str(),
        FrameTarget::Background => "background",
        FrameTarget::All => BROADCAST_PARTY,
    }
}

fn encoding_err(error: serde_json::Error) -> TransportError {
    TransportError::Encoding(error.to_string())
}

// =============================================================================
// PIPELINE
// =============================================================================

/// The security and compression stages wrapped around a transport adapter.
pub struct WirePipeline {
    inner: Arc<dyn TransportAdapter>,
    cipher: Option<MessageCipher>,
    compressor: ZstdCompressor,
    chunk_size: usize,
    assembler: ChunkAssembler,
    rate_limiter: FixedWindowRateLimiter,
    replay: ReplayGuard,
    max_message_age_ms: u64,
}

impl WirePipeline {
    /// Wraps `inner` with the configured stages. Without a cipher the
    /// pipeline refuses to send messages that demand encryption and drops
    /// inbound encrypted frames.
    pub fn new(
        inner: Arc<dyn TransportAdapter>,
        cipher: Option<MessageCipher>,
        config: PipelineConfig,
    ) -> Self {
        let chunk_size = config.compression.chunk_size.max(1);
        Self {
            inner,
            cipher,
            compressor: ZstdCompressor::new(config.compression),
            chunk_size,
            assembler: ChunkAssembler::new(config.chunk_max_age_ms),
            rate_limiter: FixedWindowRateLimiter::new(config.rate_limit),
            replay: ReplayGuard::new(),
            max_message_age_ms: config.max_message_age_ms,
        }
    }

    /// Chunk sets still waiting for missing pieces.
    #[must_use]
    pub fn pending_chunk_sets(&self) -> usize {
        self.assembler.pending_count()
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Encodes one logical frame into the frames that actually hit the wire.
    ///
    /// Returns more than one frame only when chunking kicks in. Frames whose
    /// payload is already encoded (not `Plain`) pass through untouched.
    fn encode_frames(&self, frame: TransportFrame) -> Result<Vec<TransportFrame>, TransportError> {
        let TransportFrame {
            origin,
            target,
            payload,
        } = frame;

        let message = match payload {
            WirePayload::Plain(message) => message,
            other => {
                return Ok(vec![TransportFrame {
                    origin,
                    target,
                    payload: other,
                }])
            }
        };

        let message_id = message.id;
        let wants_encryption = message.metadata.encrypted;

        let serialized = serde_json::to_vec(message.as_ref()).map_err(encoding_err)?;
        let original_len = serialized.len();

        let mut payload = match self.compressor.compress_if_worthwhile(&serialized) {
            Ok(Some(envelope)) => {
                COMPRESSION_BYTES_SAVED
                    .inc_by(original_len.saturating_sub(envelope.compressed_size) as f64);
                debug!(
                    message_id = %message_id,
                    original = original_len,
                    compressed = envelope.compressed_size,
                    "compressed outbound payload"
                );
                WirePayload::Compressed(envelope)
            }
            Ok(None) => WirePayload::Plain(message),
            Err(error) => return Err(TransportError::Encoding(error.to_string())),
        };

        if wants_encryption {
            let Some(cipher) = &self.cipher else {
                return Err(TransportError::Encoding(
                    "message demands encryption but no cipher is configured".to_string(),
                ));
            };
            let inner = serde_json::to_vec(&payload).map_err(encoding_err)?;
            let envelope = cipher
                .seal(&inner, recipient_party(&target))
                .map_err(|error| TransportError::Encoding(error.to_string()))?;
            payload = WirePayload::Encrypted(envelope);
        }

        let encoded = serde_json::to_vec(&payload).map_err(encoding_err)?;
        if encoded.len() > self.chunk_size {
            let chunks = split_into_chunks(message_id, &encoded, self.chunk_size);
            debug!(
                message_id = %message_id,
                frame_bytes = encoded.len(),
                chunks = chunks.len(),
                "splitting oversized frame"
            );
            return Ok(chunks
                .into_iter()
                .map(|chunk| TransportFrame {
                    origin: origin.clone(),
                    target: target.clone(),
                    payload: WirePayload::Chunk(chunk),
                })
                .collect());
        }

        Ok(vec![TransportFrame {
            origin,
            target,
            payload,
        }])
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Unwraps and policy-checks one inbound frame.
    ///
    /// Returns the decoded message once it has passed every stage, `None`
    /// when the frame was a partial chunk set or was dropped. Drops are
    /// counted under their reason and logged; callers never see them.
    pub fn ingest(&self, frame: TransportFrame, now: u64) -> Option<Message> {
        let party = recipient_party(&frame.target).to_string();
        let origin = frame.origin;

        let message = match self.decode_payload(frame.payload, &party, now) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err((reason, detail)) => {
                self.drop_frame(&origin, reason, &detail);
                return None;
            }
        };

        if let Err(error) = self.rate_limiter.check(&origin, now) {
            self.drop_frame(&origin, DropReason::RateLimit, &error.to_string());
            return None;
        }
        if let Err(error) = validate_timestamp(message.timestamp, now, self.max_message_age_ms) {
            self.drop_frame(&origin, DropReason::Timestamp, &error.to_string());
            return None;
        }
        if !self.replay.check_and_insert(message.id, now) {
            self.drop_frame(&origin, DropReason::Replay, "message id already accepted");
            return None;
        }

        let mut message = message;
        if message.metadata.sender.kind.is_untrusted() {
            message.payload = sanitize_value(&message.payload);
        }
        Some(message)
    }

    /// Peels the wire layers off a payload, innermost message last.
    ///
    /// `Ok(None)` means a chunk was absorbed and the set is still
    /// incomplete. Nesting is bounded: a chunk set may contain an encrypted
    /// or compressed payload, an encrypted payload may contain a compressed
    /// one, and anything else is rejected.
    fn decode_payload(
        &self,
        payload: WirePayload,
        party: &str,
        now: u64,
    ) -> Result<Option<Message>, (DropReason, String)> {
        match payload {
            WirePayload::Plain(message) => Ok(Some(*message)),

            WirePayload::Compressed(envelope) => {
                let bytes = self
                    .compressor
                    .expand(&envelope)
                    .map_err(|e| (DropReason::Decompress, e.to_string()))?;
                let message = serde_json::from_slice(&bytes)
                    .map_err(|e| (DropReason::Decode, e.to_string()))?;
                Ok(Some(message))
            }

            WirePayload::Encrypted(envelope) => {
                let Some(cipher) = &self.cipher else {
                    return Err((
                        DropReason::Decrypt,
                        "encrypted frame but no cipher is configured".to_string(),
                    ));
                };
                let bytes = cipher.open(&envelope, party).map_err(|error| match error {
                    SecurityError::SignatureInvalid => (DropReason::Signature, error.to_string()),
                    other => (DropReason::Decrypt, other.to_string()),
                })?;
                let inner: WirePayload = serde_json::from_slice(&bytes)
                    .map_err(|e| (DropReason::Decode, e.to_string()))?;
                match inner {
                    WirePayload::Encrypted(_) | WirePayload::Chunk(_) => Err((
                        DropReason::Decode,
                        "nested encrypted or chunked payload".to_string(),
                    )),
                    other => self.decode_payload(other, party, now),
                }
            }

            WirePayload::Chunk(chunk) => {
                self.assembler.evict_stale(now);
                let Some(bytes) = self
                    .assembler
                    .accept(chunk, now)
                    .map_err(|e| (DropReason::Decode, e.to_string()))?
                else {
                    return Ok(None);
                };
                let inner: WirePayload = serde_json::from_slice(&bytes)
                    .map_err(|e| (DropReason::Decode, e.to_string()))?;
                match inner {
                    WirePayload::Chunk(_) => Err((
                        DropReason::Decode,
                        "chunk set contained another chunk".to_string(),
                    )),
                    other => self.decode_payload(other, party, now),
                }
            }
        }
    }

    fn drop_frame(&self, origin: &str, reason: DropReason, detail: &str) {
        FRAMES_DROPPED.with_label_values(&[reason.as_str()]).inc();
        warn!(
            origin = %origin,
            reason = reason.as_str(),
            detail = %detail,
            "dropping inbound frame"
        );
    }
}

#[async_trait]
impl TransportAdapter for WirePipeline {
    async fn send(&self, frame: TransportFrame) -> Result<(), TransportError> {
        for encoded in self.encode_frames(frame)? {
            FRAMES_SENT.inc();
            self.inner.send(encoded).await?;
        }
        Ok(())
    }

    fn frames(&self) -> broadcast::Receiver<TransportFrame> {
        self.inner.frames()
    }
}
