//! Putting a limiter in front of a tower service.
use quotaflow::prelude::*;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), LimiterError<std::io::Error>> {
    tracing_subscriber::fmt().with_target(true).init();

    let config = RateLimitConfig::builder()
        .max_tokens(2.0)
        .refill_rate(1.0)
        .build()
        .expect("valid limiter config");
    let limiter = RateLimiter::with_config("completions", Provider::Custom, config);

    let svc = ServiceBuilder::new()
        .layer(QuotaLayer::new(limiter.clone()).with_options(CallOptions::new().priority(5)))
        .service(service_fn(|prompt: String| async move {
            Ok::<_, std::io::Error>(format!("echo: {prompt}"))
        }));

    let started = tokio::time::Instant::now();
    for i in 0..5 {
        let reply = svc.clone().oneshot(format!("prompt {i}")).await?;
        println!("{:>6.2?} {reply}", started.elapsed());
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("{:?}", limiter.status());
    Ok(())
}
