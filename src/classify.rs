//! Deciding whether a failed call was a provider rate-limit rejection.
//!
//! Only rate-limit failures are retried by the limiter; everything else fails fast.
//! When an error's shape is unknown the answer is [`ErrorClass::Other`].
//!
//! The default classifier matches well-known markers in the error's message and debug
//! output, walking the `source()` chain. Providers with precise error types can plug in
//! their own classifier, including a plain closure:
//!
//! ```rust
//! use quotaflow::classify::{ErrorClass, ErrorClassifier};
//!
//! let by_code = |err: &(dyn std::error::Error + 'static)| {
//!     if err.to_string().starts_with("E_QUOTA") { ErrorClass::RateLimited } else { ErrorClass::Other }
//! };
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "E_QUOTA exceeded");
//! assert_eq!(by_code.classify(&err), ErrorClass::RateLimited);
//! ```

use std::error::Error;

/// Outcome of classifying a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider throttled the call; retry after cooldown/backoff.
    RateLimited,
    /// Anything else; surfaced immediately.
    Other,
}

/// Pluggable classification of operation errors.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &(dyn Error + 'static)) -> ErrorClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&(dyn Error + 'static)) -> ErrorClass + Send + Sync,
{
    fn classify(&self, err: &(dyn Error + 'static)) -> ErrorClass {
        self(err)
    }
}

/// Lower-cased markers that identify throttling in provider messages.
pub const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "resourceexhausted",
    "resource_exhausted",
    "quota",
    "rate limit",
    "rate_limit",
    "too many requests",
];

/// Substring-based classifier covering the common provider SDK messages.
#[derive(Debug, Clone, Default)]
pub struct DefaultClassifier {
    extra_markers: Vec<String>,
}

impl DefaultClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat messages containing `marker` (case-insensitive) as rate limits.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.extra_markers.push(marker.into().to_lowercase());
        self
    }

    fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m))
            || self.extra_markers.iter().any(|m| lowered.contains(m.as_str()))
    }
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &(dyn Error + 'static)) -> ErrorClass {
        let mut current: Option<&(dyn Error + 'static)> = Some(err);
        while let Some(e) = current {
            // Debug output carries the type/variant name, e.g. `ResourceExhausted { .. }`.
            if self.matches(&e.to_string()) || self.matches(&format!("{e:?}")) {
                return ErrorClass::RateLimited;
            }
            current = e.source();
        }
        ErrorClass::Other
    }
}
