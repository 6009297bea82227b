//! The call scheduler: admission, cooldown handling and rate-limit aware retries.
//!
//! A [`RateLimiter`] is cheap to clone; clones share one bucket, cooldown, wait queue
//! and set of counters. Callers are admitted immediately when tokens are available, no
//! cooldown is running and nobody more urgent is waiting. Everyone else queues and is
//! woken by the dispatcher task in `(priority, arrival)` order.
//!
//! ```rust
//! use quotaflow::{Provider, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::new("gemini", Provider::GeminiFree);
//! let reply = limiter
//!     .execute(|| async { Ok::<_, std::io::Error>("hello") })
//!     .await
//!     .unwrap();
//! assert_eq!(reply, "hello");
//! assert_eq!(limiter.stats().successes, 1);
//! # }
//! ```

use crate::bucket::TokenBucket;
use crate::classify::{DefaultClassifier, ErrorClass, ErrorClassifier};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{CallOptions, Provider, RateLimitConfig};
use crate::cooldown::CooldownController;
use crate::dispatcher::{self, Throttle};
use crate::error::{AcquireError, LimiterError};
use crate::queue::{WaitSignal, Waiter, WaiterKey};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::stats::{LimiterStats, StatsSnapshot};
use crate::telemetry::{EventKind, LimiterEvent, SharedSink, TelemetrySink};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared by every clone of a limiter and its dispatcher task.
pub(crate) struct Shared {
    pub(crate) name: Arc<str>,
    pub(crate) provider: Provider,
    pub(crate) config: RateLimitConfig,
    pub(crate) throttle: Mutex<Throttle>,
    pub(crate) stats: LimiterStats,
    pub(crate) clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    classifier: Arc<dyn ErrorClassifier>,
    sink: SharedSink,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Throttle> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: EventKind) {
        self.sink.emit(LimiterEvent::new(self.name.clone(), kind));
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a limiter for operators.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Status {
    pub name: String,
    pub provider: Provider,
    pub queue_depth: usize,
    pub in_cooldown: bool,
    pub cooldown_remaining: Duration,
    pub available_tokens: f64,
}

/// Outcome of the locked admission check.
enum Admission {
    Granted,
    Queued { key: WaiterKey, signal: WaitSignal, enqueued_at: Duration, depth: usize },
}

/// Owns a queued caller's slot. Dropping it before the grant is observed removes the
/// waiter, or refunds the tokens if the dispatcher already served it.
struct QueueTicket {
    shared: Arc<Shared>,
    key: WaiterKey,
    tokens: f64,
    armed: bool,
}

impl QueueTicket {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut throttle = self.shared.lock();
        let refunded = if throttle.queue.remove(&self.key).is_some() {
            false
        } else {
            throttle.bucket.credit(self.tokens);
            true
        };
        let queued = throttle.queue.len();
        drop(throttle);
        debug!(
            target: "quotaflow::limiter",
            limiter = %self.shared.name,
            priority = self.key.priority,
            refunded,
            queued,
            "queued caller cancelled"
        );
    }
}

/// Adaptive token-bucket limiter for one provider.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Limiter using the provider's preset configuration.
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self::builder(name).provider(provider).build()
    }

    /// Limiter with an explicit configuration.
    pub fn with_config(name: impl Into<String>, provider: Provider, config: RateLimitConfig) -> Self {
        Self::builder(name).provider(provider).config(config).build()
    }

    pub fn builder(name: impl Into<String>) -> RateLimiterBuilder {
        RateLimiterBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn provider(&self) -> Provider {
        self.shared.provider
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.shared.config
    }

    /// Whether both handles share the same underlying limiter.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Wait until `tokens` can be spent at `priority` (lower is more urgent).
    pub async fn acquire(&self, tokens: f64, priority: i32) -> Result<(), AcquireError> {
        self.admit(tokens, priority, None).await
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`, releasing the
    /// queue slot.
    pub async fn acquire_timeout(
        &self,
        tokens: f64,
        priority: i32,
        timeout: Duration,
    ) -> Result<(), AcquireError> {
        self.admit(tokens, priority, Some(timeout)).await
    }

    async fn admit(
        &self,
        tokens: f64,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Result<(), AcquireError> {
        let capacity = self.shared.config.max_tokens();
        let valid = tokens > 0.0 && tokens <= capacity;
        if !valid {
            return Err(AcquireError::InvalidRequest { requested: tokens, capacity });
        }

        loop {
            let (key, signal, enqueued_at, depth) = match self.try_admit(tokens, priority) {
                Admission::Granted => {
                    self.shared.stats.record_acquired();
                    self.shared.emit(EventKind::Acquired { priority, tokens, waited: Duration::ZERO });
                    return Ok(());
                }
                Admission::Queued { key, signal, enqueued_at, depth } => {
                    (key, signal, enqueued_at, depth)
                }
            };
            let ticket = QueueTicket { shared: self.shared.clone(), key, tokens, armed: true };

            debug!(target: "quotaflow::limiter", limiter = %self.shared.name, priority, depth, "caller queued");
            self.shared.emit(EventKind::Queued { priority, depth });

            let woken = match timeout {
                None => signal.await,
                Some(limit) => match tokio::time::timeout(limit, signal).await {
                    Ok(woken) => woken,
                    Err(_) => {
                        drop(ticket);
                        let waited = self.shared.clock.now().saturating_sub(enqueued_at);
                        self.shared.emit(EventKind::TimedOut { priority, waited });
                        return Err(AcquireError::Timeout { waited });
                    }
                },
            };
            ticket.disarm();

            if woken.is_err() {
                // discarded without a grant; queue again
                continue;
            }
            let waited = self.shared.clock.now().saturating_sub(enqueued_at);
            self.shared.stats.record_acquired();
            self.shared.stats.record_wait(waited);
            self.shared.emit(EventKind::Acquired { priority, tokens, waited });
            return Ok(());
        }
    }

    fn try_admit(&self, tokens: f64, priority: i32) -> Admission {
        let shared = &self.shared;
        let mut throttle = shared.lock();
        let now = shared.clock.now();
        throttle.bucket.refill(now);

        let threshold = shared.config.starvation_threshold();
        if !throttle.cooldown.is_active(now)
            && !throttle.queue.has_higher_priority_than(priority)
            && !throttle.queue.has_starving(now, threshold)
            && throttle.bucket.try_consume(tokens)
        {
            return Admission::Granted;
        }

        let (waiter, signal) = Waiter::new(priority, tokens, now);
        let key = throttle.queue.push(waiter);
        let depth = throttle.queue.len();
        if throttle.claim_dispatcher() {
            tokio::spawn(dispatcher::run(shared.clone()));
        }
        Admission::Queued { key, signal, enqueued_at: now, depth }
    }

    /// Record a provider rejection: drain the bucket and enter cooldown, honouring a
    /// retry hint in `provider_message` when one is present.
    ///
    /// Returns the cooldown applied and the limiter's cumulative rejection count.
    pub fn mark_rejected(&self, provider_message: &str) -> (Duration, u64) {
        let (cooldown, hinted) = {
            let mut throttle = self.shared.lock();
            let now = self.shared.clock.now();
            throttle.bucket.drain(now);
            throttle.cooldown.mark_rejected(now, provider_message)
        };
        let total_rejections = self.shared.stats.record_rejection();
        warn!(
            target: "quotaflow::limiter",
            limiter = %self.shared.name,
            provider = %self.shared.provider,
            cooldown_secs = cooldown.as_secs_f64(),
            hinted,
            total_rejections,
            "provider rejected call; entering cooldown"
        );
        self.shared.emit(EventKind::Rejected { cooldown, hinted, total_rejections });
        (cooldown, total_rejections)
    }

    fn clear_cooldown(&self) -> bool {
        let cleared = self.shared.lock().cooldown.clear();
        if cleared {
            info!(target: "quotaflow::limiter", limiter = %self.shared.name, "cooldown cleared after successful call");
        }
        cleared
    }

    /// Run `operation` under the limiter with default options (one token, default
    /// priority, the limiter's retry settings).
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, LimiterError<E>>
    where
        E: std::error::Error + 'static,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        self.execute_with_retry(CallOptions::default(), operation).await
    }

    /// Run `operation` under the limiter, retrying provider rejections with capped
    /// exponential backoff.
    ///
    /// Every attempt acquires its own tokens. Errors the classifier does not recognise
    /// as rate limits are returned immediately as [`LimiterError::Inner`].
    pub async fn execute_with_retry<T, E, Fut, Op>(
        &self,
        options: CallOptions,
        mut operation: Op,
    ) -> Result<T, LimiterError<E>>
    where
        E: std::error::Error + 'static,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let retry = options.retry.unwrap_or_else(|| self.shared.config.retry());
        let backoff = retry.backoff();
        let shared = &self.shared;
        shared.stats.record_call();

        let mut rejections: u32 = 0;
        let mut attempt: u32 = 0;
        loop {
            let admitted = match retry.acquire_timeout {
                Some(limit) => self.acquire_timeout(options.tokens, options.priority, limit).await,
                None => self.acquire(options.tokens, options.priority).await,
            };
            if let Err(e) = admitted {
                shared.stats.record_failure();
                return Err(e.into());
            }
            if attempt > 0 && !retry.retry_spacing.is_zero() {
                shared.sleeper.sleep(retry.retry_spacing).await;
            }

            let err = match operation().await {
                Ok(value) => {
                    shared.stats.record_success();
                    if self.clear_cooldown() {
                        shared.emit(EventKind::CooldownCleared);
                    }
                    shared.emit(EventKind::Succeeded { attempts: attempt + 1 });
                    return Ok(value);
                }
                Err(err) => err,
            };

            if shared.classifier.classify(&err) == ErrorClass::Other {
                shared.stats.record_failure();
                error!(
                    target: "quotaflow::limiter",
                    limiter = %shared.name,
                    attempt = attempt + 1,
                    error = %err,
                    "call failed"
                );
                shared.emit(EventKind::Failed { attempts: attempt + 1 });
                return Err(LimiterError::Inner(err));
            }

            rejections += 1;
            let (_, total_rejections) = self.mark_rejected(&err.to_string());
            if attempt >= retry.max_retries {
                shared.stats.record_failure();
                shared.emit(EventKind::Exhausted { retries: retry.max_retries, rejections });
                return Err(LimiterError::RateLimitExceeded {
                    provider: shared.provider,
                    retries: retry.max_retries,
                    rejections,
                    total_rejections,
                    source: err,
                });
            }

            attempt += 1;
            let delay = retry.jitter.apply(backoff.delay(attempt as usize));
            warn!(
                target: "quotaflow::limiter",
                limiter = %shared.name,
                retry = attempt,
                max_retries = retry.max_retries,
                delay_secs = delay.as_secs_f64(),
                "rate limited; backing off"
            );
            shared.emit(EventKind::RetryScheduled { retry: attempt, delay });
            shared.sleeper.sleep(delay).await;
        }
    }

    pub fn status(&self) -> Status {
        let throttle = self.shared.lock();
        let now = self.shared.clock.now();
        Status {
            name: self.shared.name.to_string(),
            provider: self.shared.provider,
            queue_depth: throttle.queue.len(),
            in_cooldown: throttle.cooldown.is_active(now),
            cooldown_remaining: throttle.cooldown.remaining(now),
            available_tokens: throttle.bucket.available_at(now),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.shared.stats.reset();
    }
}

/// Builder for [`RateLimiter`]; the configuration is validated separately by
/// [`RateLimitConfig::builder`].
pub struct RateLimiterBuilder {
    name: String,
    provider: Provider,
    config: Option<RateLimitConfig>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    classifier: Arc<dyn ErrorClassifier>,
    sink: SharedSink,
}

impl RateLimiterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: Provider::GeminiFree,
            config: None,
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            classifier: Arc::new(DefaultClassifier::new()),
            sink: SharedSink::default(),
        }
    }

    /// Provider label; also selects the preset unless [`config`](Self::config) is set.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(mut self, config: RateLimitConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper for retry backoff and spacing.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: ErrorClassifier + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = SharedSink::new(sink);
        self
    }

    pub fn build(self) -> RateLimiter {
        let config = self.config.unwrap_or_else(|| RateLimitConfig::preset(self.provider));
        let now = self.clock.now();
        let bucket = TokenBucket::new(config.max_tokens(), config.refill_rate(), now);
        let cooldown = CooldownController::new(config.cooldown_after_reject());
        info!(
            target: "quotaflow::limiter",
            limiter = %self.name,
            provider = %self.provider,
            max_tokens = config.max_tokens(),
            refill_per_min = config.refill_rate() * 60.0,
            cooldown_secs = config.cooldown_after_reject().as_secs_f64(),
            "rate limiter initialised"
        );
        RateLimiter {
            shared: Arc::new(Shared {
                name: Arc::from(self.name),
                provider: self.provider,
                config,
                throttle: Mutex::new(Throttle::new(bucket, cooldown)),
                stats: LimiterStats::default(),
                clock: self.clock,
                sleeper: self.sleeper,
                classifier: self.classifier,
                sink: self.sink,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetryConfig;
    use crate::sleeper::TrackingSleeper;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, msg.to_string())
    }

    fn small(max_tokens: f64, per_minute: f64) -> RateLimitConfig {
        RateLimitConfig::builder()
            .max_tokens(max_tokens)
            .refill_rate(per_minute / 60.0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fast_path_consumes_tokens() {
        let limiter = RateLimiter::with_config("t", Provider::Custom, small(2.0, 2.0));
        limiter.acquire(1.0, 10).await.unwrap();
        limiter.acquire(1.0, 10).await.unwrap();
        let status = limiter.status();
        assert!(status.available_tokens < 1.0);
        assert_eq!(status.queue_depth, 0);
        assert_eq!(limiter.stats().acquired, 2);
        assert_eq!(limiter.stats().waited, 0);
    }

    #[tokio::test]
    async fn requests_above_capacity_are_invalid() {
        let limiter = RateLimiter::with_config("t", Provider::Custom, small(2.0, 2.0));
        let err = limiter.acquire(3.0, 10).await.unwrap_err();
        assert_eq!(err, AcquireError::InvalidRequest { requested: 3.0, capacity: 2.0 });
        assert!(limiter.acquire(0.0, 10).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_waits_for_refill() {
        let limiter = RateLimiter::with_config("t", Provider::Custom, small(1.0, 2.0));
        limiter.acquire(1.0, 10).await.unwrap();
        let started = tokio::time::Instant::now();
        limiter.acquire(1.0, 10).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30), "{waited:?}");
        assert!(waited < Duration::from_secs(32), "{waited:?}");
        assert_eq!(limiter.stats().waited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_queue_slot() {
        let limiter = RateLimiter::with_config("t", Provider::Custom, small(1.0, 1.0));
        limiter.acquire(1.0, 10).await.unwrap();
        let err = limiter.acquire_timeout(1.0, 10, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AcquireError::Timeout { .. }));
        assert_eq!(limiter.status().queue_depth, 0);
    }

    #[tokio::test]
    async fn mark_rejected_drains_and_parses_hint() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::builder("t").with_clock(clock.clone()).build();
        let (cooldown, total) = limiter.mark_rejected("Please try again in 9m21.6s");
        assert!((cooldown.as_secs_f64() - 562.6).abs() < 1e-6, "{cooldown:?}");
        assert_eq!(total, 1);

        let status = limiter.status();
        assert!(status.in_cooldown);
        assert_eq!(status.available_tokens, 0.0);

        clock.advance(Duration::from_secs(563));
        assert!(!limiter.status().in_cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_retried_once_then_succeeds() {
        let sleeper = TrackingSleeper::new();
        let config = RateLimitConfig::builder()
            .cooldown_after_reject(Duration::from_secs(2))
            .build()
            .unwrap();
        let limiter = RateLimiter::builder("t").config(config).with_sleeper(sleeper.clone()).build();
        let calls = AtomicU32::new(0);

        let result = limiter
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(io("429 Too Many Requests"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 1);
        // backoff, then retry spacing
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(5), Duration::from_millis(500)]);
        let stats = limiter.stats();
        assert_eq!((stats.total_calls, stats.successes, stats.rejection_hits), (1, 1, 1));
        assert!(!limiter.status().in_cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_rate_limit_exceeded() {
        let limiter = RateLimiter::builder("t").with_sleeper(TrackingSleeper::new()).build();
        let options = CallOptions::new().retry(
            RetryConfig { max_retries: 1, ..limiter.config().retry() }
                .with_backoff(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let err = limiter
            .execute_with_retry(options, || async { Err::<(), _>(io("RESOURCE_EXHAUSTED")) })
            .await
            .unwrap_err();
        assert!(err.is_rate_limit_exceeded());
        assert_eq!(err.rejection_info(), Some((1, 2, 2)));
        assert_eq!(limiter.stats().failures, 1);
    }

    #[tokio::test]
    async fn other_errors_fail_fast() {
        let limiter = RateLimiter::new("t", Provider::Groq);
        let calls = AtomicU32::new(0);
        let err = limiter
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(io("connection reset")) }
            })
            .await
            .unwrap_err();
        assert!(err.is_inner());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.stats().rejection_hits, 0);
        assert!(!limiter.status().in_cooldown);
    }

    #[tokio::test]
    async fn reset_stats_zeroes_counters() {
        let limiter = RateLimiter::new("t", Provider::GeminiPaid);
        limiter.execute(|| async { Ok::<_, io::Error>(()) }).await.unwrap();
        assert_eq!(limiter.stats().total_calls, 1);
        limiter.reset_stats();
        assert_eq!(limiter.stats(), StatsSnapshot::default());
    }
}
