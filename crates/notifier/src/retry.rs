//! Bounded exponential backoff.
//!
//! Retry `k` (0-indexed) waits `base_backoff * 2^k`, capped at `max_backoff`.
//! With the defaults the three retries wait 2s, 4s and 8s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default retries after the first failed delivery.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// What to do after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `delay`.
    Retry { delay: Duration },
    /// Retries exhausted; the record becomes `failed`.
    GiveUp,
}

impl RetryPolicy {
    /// Upper bound on `attempt_count`: the first try plus every retry.
    pub fn max_attempts(&self) -> i32 {
        i32::try_from(self.max_retries.saturating_add(1)).unwrap_or(i32::MAX)
    }

    /// Whether another attempt is allowed after `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: i32) -> bool {
        attempts_made < self.max_attempts()
    }

    /// Delay before retry number `retry_index` (0-indexed).
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let multiplier = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Decide the follow-up for a failure, given the attempt count after the
    /// failed attempt was claimed.
    pub fn decide(&self, attempts_made: i32) -> RetryDecision {
        if !self.should_retry(attempts_made) {
            return RetryDecision::GiveUp;
        }
        let retry_index = u32::try_from(attempts_made.saturating_sub(1)).unwrap_or(0);
        RetryDecision::Retry {
            delay: self.backoff(retry_index),
        }
    }
}
