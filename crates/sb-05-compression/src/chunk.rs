//! # Chunking & Reassembly
//!
//! Splits oversized serialized payloads into bounded chunks and rebuilds
//! them on the receiving side. The transport gives at-least-once, unordered
//! delivery, so reassembly tolerates duplicates and any arrival order but
//! rejects inconsistent sets.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use shared_types::wire::ChunkEnvelope;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::CompressionError;

/// Upper bound on a single chunk's payload. Senders split at the configured
/// chunk size, far below this; the assembler refuses anything larger instead
/// of buffering it.
pub const MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Split `data` into chunks of at most `chunk_size` bytes.
///
/// Always yields at least one chunk so that zero-length payloads still
/// travel as a valid set.
#[must_use]
pub fn split_into_chunks(message_id: Uuid, data: &[u8], chunk_size: usize) -> Vec<ChunkEnvelope> {
    let chunk_size = chunk_size.max(1);
    let total = data.len().div_ceil(chunk_size).max(1) as u32;

    (0..total)
        .map(|index| {
            let start = index as usize * chunk_size;
            let end = (start + chunk_size).min(data.len());
            ChunkEnvelope {
                message_id,
                chunk_index: index,
                total_chunks: total,
                data: data[start..end].to_vec(),
            }
        })
        .collect()
}

/// Rebuild the original bytes from a complete chunk set.
///
/// Validates that every chunk shares one message id and one total, that the
/// index range `0..total` is fully present, and that no index is out of
/// range. Duplicate indexes are allowed (last one wins) because the
/// transport may redeliver.
pub fn reassemble(chunks: Vec<ChunkEnvelope>) -> Result<Vec<u8>, CompressionError> {
    let Some(first) = chunks.first() else {
        return Err(CompressionError::IncompleteChunks {
            message_id: Uuid::nil(),
            reason: "empty chunk set".to_string(),
        });
    };
    let message_id = first.message_id;
    let total = first.total_chunks;

    let mut by_index: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    for chunk in chunks {
        if chunk.message_id != message_id {
            return Err(CompressionError::IncompleteChunks {
                message_id,
                reason: format!("mixed message ids ({} and {})", message_id, chunk.message_id),
            });
        }
        if chunk.total_chunks != total {
            return Err(CompressionError::IncompleteChunks {
                message_id,
                reason: format!(
                    "inconsistent totals ({total} and {})",
                    chunk.total_chunks
                ),
            });
        }
        if chunk.chunk_index >= total {
            return Err(CompressionError::IncompleteChunks {
                message_id,
                reason: format!("index {} out of range 0..{total}", chunk.chunk_index),
            });
        }
        by_index.insert(chunk.chunk_index, chunk.data);
    }

    if by_index.len() != total as usize {
        return Err(CompressionError::IncompleteChunks {
            message_id,
            reason: format!("{}/{} chunks present", by_index.len(), total),
        });
    }

    Ok(by_index.into_values().flatten().collect())
}

// =============================================================================
// INCREMENTAL ASSEMBLER
// =============================================================================

/// In-flight chunk set for one message.
struct PendingChunks {
    total: u32,
    received: BTreeMap<u32, Vec<u8>>,
    first_seen: u64,
}

/// Accumulates chunks as they arrive and yields the payload once complete.
///
/// Partial sets are evicted after `max_age_ms` so a lost chunk cannot pin
/// memory forever.
pub struct ChunkAssembler {
    pending: Mutex<HashMap<Uuid, PendingChunks>>,
    max_age_ms: u64,
}

impl ChunkAssembler {
    /// Creates an assembler that drops partial sets older than `max_age_ms`.
    #[must_use]
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_age_ms,
        }
    }

    /// Accepts one chunk. Returns the full payload when the set completes.
    ///
    /// A chunk larger than [`MAX_CHUNK_BYTES`] is refused without touching
    /// any pending state. A chunk whose metadata contradicts the set seen so
    /// far poisons the whole set: the partial state is discarded and an
    /// error returned.
    pub fn accept(
        &self,
        chunk: ChunkEnvelope,
        now: u64,
    ) -> Result<Option<Vec<u8>>, CompressionError> {
        if chunk.data.len() > MAX_CHUNK_BYTES {
            let size = chunk.data.len();
            warn!(message_id = %chunk.message_id, size, limit = MAX_CHUNK_BYTES,
                  "Refusing oversized chunk");
            return Err(CompressionError::ChunkTooLarge {
                message_id: chunk.message_id,
                size,
                limit: MAX_CHUNK_BYTES,
            });
        }

        let mut pending = self.pending.lock();

        let entry = pending.entry(chunk.message_id).or_insert_with(|| PendingChunks {
            total: chunk.total_chunks,
            received: BTreeMap::new(),
            first_seen: now,
        });

        if chunk.total_chunks != entry.total || chunk.chunk_index >= entry.total {
            let message_id = chunk.message_id;
            let reason = if chunk.total_chunks != entry.total {
                format!(
                    "inconsistent totals ({} and {})",
                    entry.total, chunk.total_chunks
                )
            } else {
                format!("index {} out of range 0..{}", chunk.chunk_index, entry.total)
            };
            pending.remove(&message_id);
            warn!(message_id = %message_id, %reason, "Discarding poisoned chunk set");
            return Err(CompressionError::IncompleteChunks { message_id, reason });
        }

        entry.received.insert(chunk.chunk_index, chunk.data);

        if entry.received.len() == entry.total as usize {
            let message_id = chunk.message_id;
            let done = pending
                .remove(&message_id)
                .map(|p| p.received.into_values().flatten().collect::<Vec<u8>>());
            debug!(message_id = %message_id, "Chunk set complete");
            return Ok(done);
        }

        Ok(None)
    }

    /// Drops partial sets older than the configured age. Returns how many
    /// were evicted.
    pub fn evict_stale(&self, now: u64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|id, p| {
            let keep = now.saturating_sub(p.first_seen) <= self.max_age_ms;
            if !keep {
                warn!(message_id = %id, received = p.received.len(), total = p.total,
                      "Evicting stale partial chunk set");
            }
            keep
        });
        before - pending.len()
    }

    /// Number of partial sets currently held.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
