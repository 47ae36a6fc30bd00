//! # Subsystem 5: Compression Layer
//!
//! Keeps large payloads cheap to move between contexts.
//!
//! ## Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `compress` | Threshold-gated zstd compression of serialized payloads |
//! | `chunk` | Splitting oversized frames and reassembling chunk sets |
//!
//! ## Rules
//!
//! - Payloads below the size threshold are never compressed.
//! - A compression result is kept only when it saves at least 10% of the
//!   original size; otherwise the payload travels uncompressed.
//! - Chunk sets are validated on reassembly: one message id, a complete
//!   index range, one consistent total.
//! - The assembler refuses any single chunk larger than `MAX_CHUNK_BYTES`.

pub mod chunk;
pub mod compress;

pub use chunk::{reassemble, split_into_chunks, ChunkAssembler, MAX_CHUNK_BYTES};
pub use compress::{CompressionConfig, Compressor, NoOpCompressor, ZstdCompressor, MIN_GAIN};

use thiserror::Error;
use uuid::Uuid;

/// Errors during compression, decompression, or chunk reassembly.
#[derive(Debug, Clone, Error)]
pub enum CompressionError {
    /// Compression failed.
    #[error("Compression failed: {0}")]
    Compress(String),

    /// Decompression failed or produced data of an unexpected size.
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// A chunk set could not be reassembled.
    #[error("Incomplete chunk set for message {message_id}: {reason}")]
    IncompleteChunks { message_id: Uuid, reason: String },

    /// A single chunk exceeded the size the assembler is willing to hold.
    #[error("Chunk for message {message_id} is {size} bytes (limit {limit})")]
    ChunkTooLarge {
        message_id: Uuid,
        size: usize,
        limit: usize,
    },
}
