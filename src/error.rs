//! Error types surfaced by the limiter.
//!
//! - [`AcquireError`]: admission failed (bad request or caller-side timeout).
//! - [`LimiterError`]: a wrapped call failed; either admission, exhausted rate-limit
//!   retries, or the operation's own error passed through untouched.
use crate::config::Provider;
use std::time::Duration;

/// Admission failures from `acquire` / `acquire_timeout`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquireError {
    /// More tokens requested than the bucket can ever hold. A caller bug, never retried.
    #[error("cannot acquire {requested} tokens (capacity {capacity})")]
    InvalidRequest { requested: f64, capacity: f64 },
    /// The caller stopped waiting; its queue slot has been released.
    #[error("gave up waiting for a token after {waited:?}")]
    Timeout { waited: Duration },
}

/// Failures of `execute` / `execute_with_retry`.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError<E>
where
    E: std::error::Error + 'static,
{
    /// More tokens requested than the bucket can ever hold.
    #[error("cannot acquire {requested} tokens (capacity {capacity})")]
    InvalidRequest { requested: f64, capacity: f64 },
    /// Timed out waiting for admission.
    #[error("gave up waiting for a token after {waited:?}")]
    AcquireTimeout { waited: Duration },
    /// The provider kept throttling until retries ran out.
    #[error(
        "rate limit exceeded after {retries} retries (provider: {provider}, \
         rejections this call: {rejections}, total rejections: {total_rejections}): {source}"
    )]
    RateLimitExceeded {
        provider: Provider,
        retries: u32,
        rejections: u32,
        total_rejections: u64,
        #[source]
        source: E,
    },
    /// The operation failed for a reason other than throttling.
    #[error(transparent)]
    Inner(E),
}

impl<E: std::error::Error + 'static> From<AcquireError> for LimiterError<E> {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::InvalidRequest { requested, capacity } => {
                LimiterError::InvalidRequest { requested, capacity }
            }
            AcquireError::Timeout { waited } => LimiterError::AcquireTimeout { waited },
        }
    }
}

impl<E: std::error::Error + 'static> LimiterError<E> {
    pub fn is_rate_limit_exceeded(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }

    pub fn is_acquire_timeout(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. })
    }

    /// The operation's error, if one was involved.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::RateLimitExceeded { source, .. } => Some(source),
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::RateLimitExceeded { source, .. } => Some(source),
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// `(retries, rejections, total_rejections)` for an exhausted call.
    pub fn rejection_info(&self) -> Option<(u32, u32, u64)> {
        match self {
            Self::RateLimitExceeded { retries, rejections, total_rejections, .. } => {
                Some((*retries, *rejections, *total_rejections))
            }
            _ => None,
        }
    }
}
