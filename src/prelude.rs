//! Convenient re-exports for common quotaflow types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    classify::{DefaultClassifier, ErrorClass, ErrorClassifier},
    config::{
        CallOptions, ConfigError, Provider, RateLimitConfig, RetryConfig, DEFAULT_PRIORITY,
        INTERACTIVE_PRIORITY,
    },
    error::{AcquireError, LimiterError},
    jitter::Jitter,
    layer::{QuotaLayer, QuotaService},
    limiter::{RateLimiter, Status},
    registry::{LimiterRegistry, RegistryError},
    stats::StatsSnapshot,
    telemetry::{LogSink, MemorySink, NullSink},
};
