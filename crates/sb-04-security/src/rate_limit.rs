//! # Rate Limiting
//!
//! Fixed-window rate limiter keyed by sender identifier.
//!
//! ## Security
//!
//! Per-sender limits prevent:
//! - A compromised content script flooding privileged contexts
//! - Resource exhaustion in the background dispatcher
//! - One noisy sender starving delivery for everyone else
//!
//! Time is always supplied by the caller, never read from a wall clock, so
//! window boundaries are exact and testable.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::SecurityError;

/// Upper bound on distinct senders tracked at once. Exceeding it forces an
/// eager prune so a flood of fabricated sender ids cannot grow memory
/// without bound.
const MAX_TRACKED_SENDERS: usize = 10_000;

/// Rate limiter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per sender within one window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// When false, every check passes.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Tight limits for exercising rejection paths in tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_requests: 3,
            window_ms: 1_000,
            enabled: true,
        }
    }
}

/// Per-sender counter for the current window.
#[derive(Debug, Clone, Copy)]
struct WindowState {
    /// Millisecond timestamp at which this window opened.
    window_start: u64,
    /// Requests counted since `window_start`.
    count: u32,
}

/// Fixed-window rate limiter.
///
/// # Algorithm
///
/// Each sender owns a window anchored at the timestamp of its first request.
/// Requests increment a counter; once the counter reaches the configured
/// maximum, further requests in the same window are rejected. When a request
/// arrives at or after `window_start + window_ms`, the window resets and the
/// counter starts over. Exactly `max_requests` requests succeed per window.
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowRateLimiter {
    /// Creates a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request from `sender` at time `now` (millis).
    ///
    /// Returns `Err(SecurityError::RateLimitExceeded)` once the sender has
    /// used up its allowance for the current window.
    pub fn check(&self, sender: &str, now: u64) -> Result<(), SecurityError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut windows = self.windows.lock();

        if windows.len() >= MAX_TRACKED_SENDERS && !windows.contains_key(sender) {
            let window_ms = self.config.window_ms;
            windows.retain(|_, state| now.saturating_sub(state.window_start) < window_ms);
        }

        let state = windows.entry(sender.to_string()).or_insert(WindowState {
            window_start: now,
            count: 0,
        });

        if now.saturating_sub(state.window_start) >= self.config.window_ms {
            state.window_start = now;
            state.count = 0;
        }

        if state.count >= self.config.max_requests {
            tracing::warn!(
                sender = %sender,
                max_requests = self.config.max_requests,
                window_ms = self.config.window_ms,
                "rate limit exceeded"
            );
            return Err(SecurityError::RateLimitExceeded {
                sender: sender.to_string(),
                max_requests: self.config.max_requests,
            });
        }

        state.count += 1;
        Ok(())
    }

    /// Drops window state for senders whose window has fully elapsed.
    pub fn prune(&self, now: u64) {
        let window_ms = self.config.window_ms;
        self.windows
            .lock()
            .retain(|_, state| now.saturating_sub(state.window_start) < window_ms);
    }

    /// Number of senders currently tracked.
    #[must_use]
    pub fn tracked_senders(&self) -> usize {
        self.windows.lock().len()
    }

    /// Remaining allowance for `sender` at time `now`, without consuming it.
    #[must_use]
    pub fn remaining(&self, sender: &str, now: u64) -> u32 {
        if !self.config.enabled {
            return self.config.max_requests;
        }
        let windows = self.windows.lock();
        match windows.get(sender) {
            Some(state) if now.saturating_sub(state.window_start) < self.config.window_ms => {
                self.config.max_requests.saturating_sub(state.count)
            }
            _ => self.config.max_requests,
        }
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
