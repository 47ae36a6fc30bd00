//! Retry delay curves.
//!
//! The delay before attempt `n` (1-based) is `base * n` for the linear curve
//! and `base * 2^n` for the exponential curve. All arithmetic saturates, so
//! large attempt counts cannot overflow into short delays.

use serde::{Deserialize, Serialize};

/// How retry delays grow with the number of failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * attempts`
    Linear,
    /// `base * 2^attempts`
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

impl BackoffStrategy {
    /// Delay in milliseconds before the next retry, given the number of
    /// failed attempts so far.
    #[must_use]
    pub fn delay_ms(&self, base_ms: u64, attempts: u32) -> u64 {
        match self {
            Self::Linear => base_ms.saturating_mul(u64::from(attempts)),
            Self::Exponential => {
                let factor = 2u64.saturating_pow(attempts);
                base_ms.saturating_mul(factor)
            }
        }
    }
}
