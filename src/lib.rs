#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotaflow
//!
//! Adaptive, priority-aware scheduling of calls to quota-constrained async APIs.
//!
//! A [`RateLimiter`] sits in front of one provider and decides when each call may run:
//!
//! - **Token bucket** admission with continuous refill
//! - **Cooldown** after a provider rejection, honouring "try again in 9m21.6s" hints
//! - **Priority wait queue** served by a single background dispatcher, with optional
//!   starvation aging
//! - **Rate-limit aware retries** with capped exponential backoff and optional jitter
//! - **Stats**, a **registry** of named limiters, telemetry sinks and a tower layer
//!
//! ## Quick Start
//!
//! ```rust
//! use quotaflow::{CallOptions, Provider, RateLimiter, INTERACTIVE_PRIORITY};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new("gemini", Provider::GeminiFree);
//!
//!     let answer = limiter
//!         .execute_with_retry(CallOptions::new().priority(INTERACTIVE_PRIORITY), || async {
//!             // call the provider here
//!             Ok::<_, std::io::Error>(42)
//!         })
//!         .await;
//!
//!     assert_eq!(answer.unwrap(), 42);
//!     println!("{:?}", limiter.status());
//! }
//! ```

pub mod backoff;
pub mod bucket;
pub mod classify;
pub mod clock;
pub mod config;
pub mod cooldown;
mod dispatcher;
pub mod error;
pub mod jitter;
pub mod layer;
pub mod limiter;
pub mod prelude;
pub mod queue;
pub mod registry;
pub mod sleeper;
pub mod stats;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use classify::{DefaultClassifier, ErrorClass, ErrorClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    CallOptions, ConfigError, Provider, RateLimitConfig, RateLimitConfigBuilder, RetryConfig,
    DEFAULT_PRIORITY, INTERACTIVE_PRIORITY,
};
pub use cooldown::parse_retry_hint;
pub use error::{AcquireError, LimiterError};
pub use jitter::Jitter;
pub use layer::{QuotaLayer, QuotaService};
pub use limiter::{RateLimiter, RateLimiterBuilder, Status};
pub use registry::{LimiterRegistry, RegistryError};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use stats::StatsSnapshot;
