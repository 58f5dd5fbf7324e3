//! Retry policy for connection attempts.
//!
//! DESIGN
//! ======
//! A pure decision function: given the number of the attempt that just
//! failed, return how long to wait before the next one, or `None` to give up.
//! The session owns the loop; this module never sleeps.

use std::time::Duration;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff shape for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay between every attempt.
    Fixed { delay: Duration, max_attempts: u32 },
    /// `base * factor^(n-1)` after attempt `n`, capped at `max_delay`.
    Exponential { base: Duration, factor: u32, max_delay: Duration, max_attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Fixed { delay: DEFAULT_RETRY_DELAY, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl RetryPolicy {
    /// One attempt, no retries.
    #[must_use]
    pub fn never() -> Self {
        Self::Fixed { delay: Duration::ZERO, max_attempts: 1 }
    }

    /// Total attempts allowed. Zero is treated as one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let raw = match self {
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => *max_attempts,
        };
        raw.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None` to give up.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        match *self {
            Self::Fixed { delay, .. } => Some(delay),
            Self::Exponential { base, factor, max_delay, .. } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
                let delay = base.checked_mul(multiplier).unwrap_or(max_delay);
                Some(delay.min(max_delay))
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
