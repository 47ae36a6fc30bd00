//! # Replay Prevention
//!
//! Timestamp-window validation plus a bounded seen-id cache. A message is
//! accepted at most once, and only while its timestamp is inside the window,
//! so the cache needs to remember ids for just twice the window length.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::SecurityError;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Maximum allowed clock skew for future timestamps (milliseconds).
pub const MAX_FUTURE_SKEW_MS: u64 = 10_000;

/// Duration to retain seen ids (2x the default validity window for safety).
pub const REPLAY_CACHE_TTL_MS: u64 = 120_000;

/// Maximum seen-id cache size before forced cleanup.
pub const MAX_REPLAY_CACHE_SIZE: usize = 100_000;

// =============================================================================
// TIMESTAMP VALIDATION
// =============================================================================

/// Validates that a message timestamp is within the acceptable window.
///
/// Valid range: `now - max_age_ms <= timestamp <= now + MAX_FUTURE_SKEW_MS`.
pub fn validate_timestamp(timestamp: u64, now: u64, max_age_ms: u64) -> Result<(), SecurityError> {
    // Too old
    if timestamp + max_age_ms < now {
        return Err(SecurityError::TimestampOutOfRange { timestamp, now });
    }

    // Too far in the future
    if timestamp > now + MAX_FUTURE_SKEW_MS {
        return Err(SecurityError::TimestampOutOfRange { timestamp, now });
    }

    Ok(())
}

// =============================================================================
// REPLAY GUARD
// =============================================================================

/// Thread-safe seen-id cache for replay prevention.
///
/// ## Design
///
/// - Tracks message ids with their insertion time.
/// - Evicts expired entries when the cache grows past its bound, so a flood
///   of unique ids cannot exhaust memory.
/// - An id inside its TTL is a replay; an expired id may be reused (its
///   timestamp would fail validation anyway).
pub struct ReplayGuard {
    seen: Mutex<HashMap<Uuid, u64>>,
    ttl_ms: u64,
}

impl ReplayGuard {
    /// Creates a guard with the default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(REPLAY_CACHE_TTL_MS)
    }

    /// Creates a guard that remembers ids for `ttl_ms`.
    #[must_use]
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl_ms,
        }
    }

    /// Checks whether `message_id` is fresh; if so, records it.
    ///
    /// Returns `true` for a fresh id, `false` for a replay.
    pub fn check_and_insert(&self, message_id: Uuid, now: u64) -> bool {
        let mut seen = self.seen.lock();

        // Forced cleanup once the cache is too large
        if seen.len() >= MAX_REPLAY_CACHE_SIZE {
            let ttl = self.ttl_ms;
            seen.retain(|_, inserted| now.saturating_sub(*inserted) <= ttl);
            warn!(remaining = seen.len(), "Replay cache hit size bound, evicted expired ids");
        }

        if let Some(&inserted) = seen.get(&message_id) {
            if now.saturating_sub(inserted) <= self.ttl_ms {
                return false;
            }
            // Expired entry, will be replaced
        }

        seen.insert(message_id, now);
        true
    }

    /// Drops entries older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self, now: u64) -> usize {
        let mut seen = self.seen.lock();
        let before = seen.len();
        let ttl = self.ttl_ms;
        seen.retain(|_, inserted| now.saturating_sub(*inserted) <= ttl);
        before - seen.len()
    }

    /// Returns the current number of cached ids.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
