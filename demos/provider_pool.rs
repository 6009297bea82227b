//! Several callers sharing per-provider limiters from a registry.
//!
//! Run with `RUST_LOG`-style filtering handled by the default fmt subscriber:
//! `cargo run --example provider_pool`
use quotaflow::prelude::*;
use quotaflow::telemetry::{LogSink, NonBlockingSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ProviderError(String);

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProviderError {}

#[tokio::main]
async fn main() -> Result<(), LimiterError<ProviderError>> {
    tracing_subscriber::fmt().with_target(true).init();

    let registry = LimiterRegistry::new();
    let fast = RateLimitConfig::builder()
        .max_tokens(3.0)
        .refill_rate(2.0)
        .cooldown_after_reject(Duration::from_secs(2))
        .initial_backoff(Duration::from_millis(200))
        .max_backoff(Duration::from_secs(1))
        .build()
        .expect("valid limiter config");
    let groq = RateLimiter::builder("groq")
        .provider(Provider::Groq)
        .config(fast)
        .with_sink(NonBlockingSink::with_capacity(LogSink, 256))
        .build();
    registry.insert(groq.clone());

    // The provider throttles every fifth request, with a retry hint.
    let served = Arc::new(AtomicU32::new(0));
    let mut tasks = Vec::new();
    for job in 0..10 {
        let limiter = groq.clone();
        let served = served.clone();
        let priority = if job % 4 == 0 { INTERACTIVE_PRIORITY } else { DEFAULT_PRIORITY };
        tasks.push(tokio::spawn(async move {
            limiter
                .execute_with_retry(CallOptions::new().priority(priority), || {
                    let n = served.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n % 5 == 4 {
                            Err(ProviderError("429 rate limit: try again in 1s".into()))
                        } else {
                            Ok(format!("job {job} answered (request #{n})"))
                        }
                    }
                })
                .await
        }));
    }

    for task in tasks {
        match task.await {
            Ok(Ok(answer)) => println!("{answer}"),
            Ok(Err(err)) => println!("failed: {err}"),
            Err(join) => println!("task panicked: {join}"),
        }
    }

    for status in registry.snapshot() {
        println!("{status:?}");
    }
    println!("{:?}", groq.stats());
    Ok(())
}
