//! Limiter configuration and provider presets.
//!
//! A [`RateLimitConfig`] is immutable once built; every limiter owns one. Presets
//! capture the published free/paid quotas of the providers this crate was built
//! against, tuned slightly under the hard limits.
//!
//! ```rust
//! use quotaflow::{Provider, RateLimitConfig};
//! use std::time::Duration;
//!
//! let groq = RateLimitConfig::preset(Provider::Groq);
//! assert_eq!(groq.max_tokens(), 25.0);
//!
//! let custom = RateLimitConfig::builder()
//!     .max_tokens(2.0)
//!     .refill_rate(2.0 / 60.0)
//!     .cooldown_after_reject(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! assert_eq!(custom.max_retries(), 2);
//! ```

use crate::backoff::Backoff;
use crate::jitter::Jitter;
use std::fmt;
use std::time::Duration;

/// Default priority for callers that do not pick one. Lower numbers are served first.
pub const DEFAULT_PRIORITY: i32 = 10;
/// Priority reserved for interactive, user-facing calls.
pub const INTERACTIVE_PRIORITY: i32 = 0;

const DEFAULT_MIN_WAIT_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_RETRY_SPACING: Duration = Duration::from_millis(500);

/// Providers with built-in presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Provider {
    GeminiFree,
    GeminiPaid,
    Groq,
    /// Anything else; falls back to the most conservative preset unless configured.
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GeminiFree => "gemini_free",
            Provider::GeminiPaid => "gemini_paid",
            Provider::Groq => "groq",
            Provider::Custom => "custom",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_tokens must be finite and > 0 (got {0})")]
    InvalidMaxTokens(f64),
    #[error("refill_rate must be finite and > 0 (got {0})")]
    InvalidRefillRate(f64),
    #[error("max_backoff ({max:?}) must be >= initial_backoff ({initial:?})")]
    BackoffRange { initial: Duration, max: Duration },
    #[error("min_wait_interval must be > 0")]
    ZeroMinWaitInterval,
    #[error("starvation_threshold must be > 0 when set")]
    ZeroStarvationThreshold,
}

/// Validated per-limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    max_tokens: f64,
    refill_rate: f64,
    cooldown_after_reject: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    min_wait_interval: Duration,
    retry_spacing: Duration,
    starvation_threshold: Option<Duration>,
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Preset for a known provider. `Custom` uses the `GeminiFree` numbers.
    pub fn preset(provider: Provider) -> Self {
        let (max_tokens, cooldown, max_retries, initial, max) = match provider {
            Provider::GeminiFree | Provider::Custom => (10.0, 60, 2, 5, 60),
            Provider::GeminiPaid => (10.0, 60, 3, 2, 60),
            // 25 of the 30 RPM allowance; provider hints usually override the cooldown.
            Provider::Groq => (25.0, 15, 3, 2, 30),
        };
        Self {
            max_tokens,
            refill_rate: max_tokens / 60.0,
            cooldown_after_reject: Duration::from_secs(cooldown),
            max_retries,
            initial_backoff: Duration::from_secs(initial),
            max_backoff: Duration::from_secs(max),
            min_wait_interval: DEFAULT_MIN_WAIT_INTERVAL,
            retry_spacing: DEFAULT_RETRY_SPACING,
            starvation_threshold: None,
        }
    }

    /// Bucket capacity.
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// Tokens regenerated per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Cooldown applied after a rejection that carries no usable hint.
    pub fn cooldown_after_reject(&self) -> Duration {
        self.cooldown_after_reject
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Shortest pause the dispatcher takes while waiting for tokens.
    pub fn min_wait_interval(&self) -> Duration {
        self.min_wait_interval
    }

    /// Pause before re-invoking the operation on a retry.
    pub fn retry_spacing(&self) -> Duration {
        self.retry_spacing
    }

    /// Queue time after which a waiter is served ahead of higher priorities.
    pub fn starvation_threshold(&self) -> Option<Duration> {
        self.starvation_threshold
    }

    /// Retry settings derived from this config.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            retry_spacing: self.retry_spacing,
            jitter: Jitter::None,
            acquire_timeout: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_tokens.is_finite() && self.max_tokens > 0.0) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(ConfigError::InvalidRefillRate(self.refill_rate));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::BackoffRange {
                initial: self.initial_backoff,
                max: self.max_backoff,
            });
        }
        if self.min_wait_interval.is_zero() {
            return Err(ConfigError::ZeroMinWaitInterval);
        }
        if self.starvation_threshold.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroStarvationThreshold);
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::preset(Provider::GeminiFree)
    }
}

/// Builder for [`RateLimitConfig`]; starts from the `GeminiFree` preset.
#[derive(Debug, Clone)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self { config: RateLimitConfig::default() }
    }

    /// Start from a provider preset instead of the default.
    pub fn from_preset(provider: Provider) -> Self {
        Self { config: RateLimitConfig::preset(provider) }
    }

    pub fn max_tokens(mut self, max_tokens: f64) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    pub fn refill_rate(mut self, tokens_per_second: f64) -> Self {
        self.config.refill_rate = tokens_per_second;
        self
    }

    pub fn cooldown_after_reject(mut self, cooldown: Duration) -> Self {
        self.config.cooldown_after_reject = cooldown;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    pub fn min_wait_interval(mut self, interval: Duration) -> Self {
        self.config.min_wait_interval = interval;
        self
    }

    pub fn retry_spacing(mut self, spacing: Duration) -> Self {
        self.config.retry_spacing = spacing;
        self
    }

    pub fn starvation_threshold(mut self, threshold: Duration) -> Self {
        self.config.starvation_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry behaviour of a single `execute_with_retry` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Pause before re-invoking the operation on every retry.
    pub retry_spacing: Duration,
    pub jitter: Jitter,
    /// Give up waiting for a token after this long.
    pub acquire_timeout: Option<Duration>,
}

impl RetryConfig {
    /// Capped exponential schedule for this config.
    pub fn backoff(&self) -> Backoff {
        let base = Backoff::exponential(self.initial_backoff);
        match base.clone().with_max(self.max_backoff.max(self.initial_backoff)) {
            Ok(capped) => capped,
            // only reachable with a zero initial and zero max backoff
            Err(_) => base,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.retry_spacing = spacing;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// Per-call options for `execute_with_retry`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub tokens: f64,
    pub priority: i32,
    /// Overrides the limiter's retry settings when set.
    pub retry: Option<RetryConfig>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self { tokens: 1.0, priority: DEFAULT_PRIORITY, retry: None }
    }

    pub fn tokens(mut self, tokens: f64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_published_quotas() {
        let free = RateLimitConfig::preset(Provider::GeminiFree);
        assert_eq!(free.max_tokens(), 10.0);
        assert!((free.refill_rate() - 10.0 / 60.0).abs() < 1e-12);
        assert_eq!(free.cooldown_after_reject(), Duration::from_secs(60));
        assert_eq!(free.max_retries(), 2);
        assert_eq!(free.initial_backoff(), Duration::from_secs(5));

        let paid = RateLimitConfig::preset(Provider::GeminiPaid);
        assert_eq!(paid.max_retries(), 3);
        assert_eq!(paid.initial_backoff(), Duration::from_secs(2));

        let groq = RateLimitConfig::preset(Provider::Groq);
        assert_eq!(groq.max_tokens(), 25.0);
        assert_eq!(groq.cooldown_after_reject(), Duration::from_secs(15));
        assert_eq!(groq.max_backoff(), Duration::from_secs(30));

        assert_eq!(RateLimitConfig::preset(Provider::Custom), free);
    }

    #[test]
    fn builder_validates() {
        assert_eq!(
            RateLimitConfig::builder().max_tokens(0.0).build(),
            Err(ConfigError::InvalidMaxTokens(0.0))
        );
        assert!(matches!(
            RateLimitConfig::builder().refill_rate(f64::NAN).build(),
            Err(ConfigError::InvalidRefillRate(_))
        ));
        assert!(matches!(
            RateLimitConfig::builder()
                .initial_backoff(Duration::from_secs(10))
                .max_backoff(Duration::from_secs(1))
                .build(),
            Err(ConfigError::BackoffRange { .. })
        ));
        assert_eq!(
            RateLimitConfig::builder().min_wait_interval(Duration::ZERO).build(),
            Err(ConfigError::ZeroMinWaitInterval)
        );
        assert_eq!(
            RateLimitConfig::builder().starvation_threshold(Duration::ZERO).build(),
            Err(ConfigError::ZeroStarvationThreshold)
        );
    }

    #[test]
    fn retry_config_mirrors_limiter_config() {
        let config = RateLimitConfigBuilder::from_preset(Provider::Groq)
            .retry_spacing(Duration::from_secs(1))
            .build()
            .unwrap();
        let retry = config.retry();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.retry_spacing, Duration::from_secs(1));
        assert_eq!(retry.backoff().delay(5), Duration::from_secs(30));
        assert_eq!(retry.jitter, Jitter::None);
    }

    #[test]
    fn call_options_defaults() {
        let opts = CallOptions::default();
        assert_eq!(opts.tokens, 1.0);
        assert_eq!(opts.priority, DEFAULT_PRIORITY);
        assert!(opts.retry.is_none());
    }
}
