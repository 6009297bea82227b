#![allow(missing_docs)]

use quotaflow::{AcquireError, Provider, RateLimitConfig, RateLimiter};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn limiter(max_tokens: f64, per_minute: f64) -> RateLimiter {
    let config = RateLimitConfig::builder()
        .max_tokens(max_tokens)
        .refill_rate(per_minute / 60.0)
        .build()
        .unwrap();
    RateLimiter::with_config("test", Provider::Custom, config)
}

fn spawn_recorded(
    limiter: &RateLimiter,
    priority: i32,
    label: &'static str,
    order: &Arc<Mutex<Vec<&'static str>>>,
) -> tokio::task::JoinHandle<()> {
    let limiter = limiter.clone();
    let order = order.clone();
    tokio::spawn(async move {
        limiter.acquire(1.0, priority).await.unwrap();
        order.lock().unwrap().push(label);
    })
}

#[tokio::test(start_paused = true)]
async fn third_caller_waits_for_one_refill_period() {
    let limiter = limiter(2.0, 2.0);
    let start = Instant::now();
    limiter.acquire(1.0, 10).await.unwrap();
    limiter.acquire(1.0, 10).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire(1.0, 10).await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(30), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(30_200), "waited {waited:?}");

    let stats = limiter.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.waited, 1);
    assert!(stats.average_wait() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn higher_priority_arrival_is_served_first() {
    let limiter = limiter(2.0, 2.0);
    limiter.acquire(1.0, 10).await.unwrap();
    limiter.acquire(1.0, 10).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let background = spawn_recorded(&limiter, 10, "background-1", &order);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let later = spawn_recorded(&limiter, 10, "background-2", &order);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let interactive = spawn_recorded(&limiter, 0, "interactive", &order);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(limiter.status().queue_depth, 3);

    futures::future::join_all([background, later, interactive]).await;
    assert_eq!(*order.lock().unwrap(), ["interactive", "background-1", "background-2"]);
}

#[tokio::test(start_paused = true)]
async fn queued_callers_are_served_by_priority() {
    let limiter = limiter(1.0, 1.0);
    limiter.acquire(1.0, 10).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let handles = vec![
        spawn_recorded(&limiter, 5, "p5", &order),
        spawn_recorded(&limiter, 1, "p1", &order),
        spawn_recorded(&limiter, 3, "p3", &order),
    ];
    futures::future::join_all(handles).await;
    assert_eq!(*order.lock().unwrap(), ["p1", "p3", "p5"]);
}

#[tokio::test(start_paused = true)]
async fn nobody_is_admitted_during_cooldown() {
    let limiter = RateLimiter::new("gemini", Provider::GeminiFree);
    let (cooldown, _) = limiter.mark_rejected("Rate limit reached. Please try again in 20s.");
    assert_eq!(cooldown, Duration::from_secs(21));
    assert!(limiter.status().in_cooldown);

    let start = Instant::now();
    limiter.acquire(1.0, 0).await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(21), "admitted after {waited:?}");
    assert!(waited < Duration::from_secs(23), "admitted after {waited:?}");
    assert!(!limiter.status().in_cooldown);
}

#[tokio::test(start_paused = true)]
async fn default_cooldown_applies_without_a_hint() {
    let config = RateLimitConfig::builder()
        .cooldown_after_reject(Duration::from_secs(10))
        .build()
        .unwrap();
    let limiter = RateLimiter::with_config("t", Provider::Custom, config);
    let (cooldown, total) = limiter.mark_rejected("429 Too Many Requests");
    assert_eq!(cooldown, Duration::from_secs(10));
    assert_eq!(total, 1);

    let start = Instant::now();
    limiter.acquire(1.0, 10).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn timed_out_caller_leaves_the_queue() {
    let limiter = limiter(1.0, 1.0);
    limiter.acquire(1.0, 10).await.unwrap();

    let err = limiter.acquire_timeout(1.0, 10, Duration::from_secs(3)).await.unwrap_err();
    match err {
        AcquireError::Timeout { waited } => {
            assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "{waited:?}")
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(limiter.status().queue_depth, 0);

    // the abandoned slot does not hold back the next caller
    let start = Instant::now();
    limiter.acquire(1.0, 10).await.unwrap();
    assert!(start.elapsed() <= Duration::from_secs(58), "{:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_refunds_a_grant_it_never_saw() {
    let limiter = limiter(1.0, 1.0);
    limiter.acquire(1.0, 10).await.unwrap();

    let mut pending = Box::pin(limiter.acquire(1.0, 10));
    assert!(futures::poll!(pending.as_mut()).is_pending());
    assert_eq!(limiter.status().queue_depth, 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..100 {
        if limiter.status().queue_depth == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(limiter.status().queue_depth, 0, "dispatcher should have served the waiter");
    assert!(limiter.status().available_tokens < 1.0);

    drop(pending);
    assert!(limiter.status().available_tokens >= 1.0);
    assert_eq!(limiter.stats().acquired, 1, "a refunded grant is not an acquisition");

    let start = Instant::now();
    limiter.acquire(1.0, 10).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(limiter.stats().acquired, 2);
}

#[tokio::test(start_paused = true)]
async fn starving_waiter_is_served_ahead_of_urgent_ones() {
    let config = RateLimitConfig::builder()
        .max_tokens(1.0)
        .refill_rate(0.1)
        .starvation_threshold(Duration::from_secs(5))
        .build()
        .unwrap();
    let limiter = RateLimiter::with_config("aging", Provider::Custom, config);
    limiter.acquire(1.0, 10).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let batch = spawn_recorded(&limiter, 50, "batch", &order);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let urgent = spawn_recorded(&limiter, 0, "urgent", &order);
    futures::future::join_all([batch, urgent]).await;

    assert_eq!(*order.lock().unwrap(), ["batch", "urgent"]);
}

#[tokio::test(start_paused = true)]
async fn without_aging_priority_wins() {
    let limiter = limiter(1.0, 6.0);
    limiter.acquire(1.0, 10).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let batch = spawn_recorded(&limiter, 50, "batch", &order);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let urgent = spawn_recorded(&limiter, 0, "urgent", &order);
    futures::future::join_all([batch, urgent]).await;

    assert_eq!(*order.lock().unwrap(), ["urgent", "batch"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_all_get_through() {
    let limiter = limiter(5.0, 60.0);
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(1.0, i % 3).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    assert!(results.iter().all(|r| matches!(r, Ok(Ok(())))));

    let stats = limiter.stats();
    assert_eq!(stats.acquired, 20);
    assert_eq!(stats.waited, 15);
    assert_eq!(limiter.status().queue_depth, 0);
}

#[tokio::test]
async fn oversized_requests_are_refused() {
    let limiter = limiter(2.0, 2.0);
    let err = limiter.acquire(2.5, 10).await.unwrap_err();
    assert!(matches!(err, AcquireError::InvalidRequest { .. }));
    assert_eq!(limiter.stats().acquired, 0);
}

/// Telemetry sink that never reports ready.
#[derive(Clone)]
struct Backlogged;

impl tower::Service<quotaflow::telemetry::LimiterEvent> for Backlogged {
    type Response = ();
    type Error = std::convert::Infallible;
    type Future = futures::future::Ready<Result<(), Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Pending
    }

    fn call(&mut self, _event: quotaflow::telemetry::LimiterEvent) -> Self::Future {
        futures::future::ready(Ok(()))
    }
}

impl quotaflow::telemetry::TelemetrySink for Backlogged {
    type SinkError = std::convert::Infallible;
}

#[tokio::test(start_paused = true)]
async fn backlogged_sink_never_holds_up_callers() {
    let limiter = RateLimiter::builder("backlogged")
        .provider(Provider::Groq)
        .with_sink(Backlogged)
        .build();

    let start = Instant::now();
    let admitted = tokio::time::timeout(Duration::from_secs(1), limiter.acquire(1.0, 0)).await;
    assert!(matches!(admitted, Ok(Ok(()))));

    let value = tokio::time::timeout(
        Duration::from_secs(1),
        limiter.execute(|| async { Ok::<_, std::io::Error>(7) }),
    )
    .await
    .expect("execute should not wait on telemetry")
    .unwrap();
    assert_eq!(value, 7);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(limiter.stats().acquired, 2);
}
