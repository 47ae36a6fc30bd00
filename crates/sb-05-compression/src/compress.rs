//! # Payload Compression
//!
//! Zstd compression gated by a size threshold and a minimum-gain check.

use shared_types::wire::{CompressedEnvelope, CompressionAlgorithm};
use tracing::trace;

use crate::CompressionError;

/// Minimum fraction of the original size a compression pass must save for
/// the compressed form to be kept on the wire.
pub const MIN_GAIN: f64 = 0.10;

// =============================================================================
// COMPRESSION CONFIGURATION
// =============================================================================

/// Configuration for payload compression.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Payloads at or above this many bytes are candidates for compression.
    pub threshold_bytes: usize,
    /// Compression level (1-22, default 3)
    pub level: i32,
    /// Enable compression
    pub enabled: bool,
    /// Maximum serialized frame size before chunking kicks in.
    pub chunk_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 1024,
            level: 3,
            enabled: true,
            chunk_size: 64 * 1024,
        }
    }
}

impl CompressionConfig {
    /// Create config for testing (low threshold, fast level).
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            threshold_bytes: 16,
            level: 1,
            enabled: true,
            chunk_size: 64,
        }
    }
}

// =============================================================================
// COMPRESSOR TRAIT
// =============================================================================

/// Trait for payload compression implementations.
pub trait Compressor: Send + Sync {
    /// Compress data unconditionally.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
    /// Check if compression is enabled.
    fn is_enabled(&self) -> bool;
}

// =============================================================================
// ZSTD COMPRESSOR
// =============================================================================

/// Zstd-based compressor with threshold and minimum-gain gating.
pub struct ZstdCompressor {
    config: CompressionConfig,
}

impl ZstdCompressor {
    /// Create a new Zstd compressor.
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Create with default settings.
    pub fn default_compressor() -> Self {
        Self::new(CompressionConfig::default())
    }

    /// The active configuration.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress `data` when doing so is worthwhile.
    ///
    /// Returns `None` when compression is disabled, the payload is below the
    /// threshold, or the compressed form saves less than [`MIN_GAIN`].
    pub fn compress_if_worthwhile(
        &self,
        data: &[u8],
    ) -> Result<Option<CompressedEnvelope>, CompressionError> {
        if !self.config.enabled || data.len() < self.config.threshold_bytes {
            return Ok(None);
        }

        let compressed = self.compress(data)?;
        let gain = 1.0 - (compressed.len() as f64 / data.len() as f64);
        if gain < MIN_GAIN {
            trace!(
                original = data.len(),
                compressed = compressed.len(),
                "Compression gain below minimum, sending uncompressed"
            );
            return Ok(None);
        }

        Ok(Some(CompressedEnvelope::new(
            CompressionAlgorithm::Zstd,
            data.len(),
            compressed,
        )))
    }

    /// Expand a compressed envelope back into the original bytes.
    ///
    /// The declared `original_size` must match the decompressed length;
    /// a mismatch means the envelope was corrupted or tampered with.
    pub fn expand(&self, envelope: &CompressedEnvelope) -> Result<Vec<u8>, CompressionError> {
        let out = self.decompress(&envelope.data)?;
        if out.len() != envelope.original_size {
            return Err(CompressionError::Decompress(format!(
                "size mismatch: expected {} bytes, got {}",
                envelope.original_size,
                out.len()
            )));
        }
        Ok(out)
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.config.level)
            .map_err(|e| CompressionError::Compress(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(|e| CompressionError::Decompress(e.to_string()))
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

// =============================================================================
// NO-OP COMPRESSOR
// =============================================================================

/// No-op compressor that returns data unchanged.
pub struct NoOpCompressor;

impl Compressor for NoOpCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
