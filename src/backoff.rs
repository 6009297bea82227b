//! Backoff between rate-limited retries.
//!
//! Retry `n` (1-based) waits `initial * 2^(n-1)`, capped at the configured maximum.
//! Retry `0` is the initial call and never waits. Arithmetic saturates at
//! [`MAX_BACKOFF`] instead of overflowing.
//!
//! ```rust
//! use std::time::Duration;
//! use quotaflow::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(5))
//!     .with_max(Duration::from_secs(60))
//!     .unwrap();
//! let delays: Vec<u64> = (1..=6).map(|n| backoff.delay(n).as_secs()).collect();
//! assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
//! ```

use std::time::Duration;

/// Ceiling applied when a computed delay would overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Capped exponential delay schedule for retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    /// Doubling delay starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Cap every delay at `max`. Rejects a zero cap or one below the base.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Delay before retry `retry` (1-based; `0` is the initial call).
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(u32::MAX as usize) as u32;
        let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
        let raw = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
        self.max.map_or(raw, |max| raw.min(max)).min(MAX_BACKOFF)
    }
}
