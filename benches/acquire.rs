use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quotaflow::{Provider, QuotaLayer, RateLimitConfig, RateLimiter};

use futures::future::Ready;
use tower::{Service, ServiceBuilder};

// A simple service that just returns its input.
#[derive(Clone)]
struct EchoService;

impl Service<&'static str> for EchoService {
    type Response = &'static str;
    type Error = std::io::Error;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: &'static str) -> Self::Future {
        futures::future::ready(Ok(req))
    }
}

// Large enough that the bucket never runs dry during a run.
fn unbounded() -> RateLimiter {
    let config = RateLimitConfig::builder()
        .max_tokens(1e12)
        .refill_rate(1e12)
        .build()
        .unwrap();
    RateLimiter::with_config("bench", Provider::Custom, config)
}

fn acquire_fast_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limiter = unbounded();

    c.bench_function("acquire_fast_path", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(limiter.acquire(black_box(1.0), 10)).await;
        });
    });
}

fn execute_fast_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limiter = unbounded();

    c.bench_function("execute_fast_path", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(limiter.execute(|| async { Ok::<_, std::io::Error>(()) }).await);
        });
    });
}

fn quota_layer_echo(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let svc = ServiceBuilder::new().layer(QuotaLayer::new(unbounded())).service(EchoService);

    c.bench_function("quota_layer_echo", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = svc.clone();
            let _ = black_box(local_svc.call(black_box("request"))).await;
        });
    });
}

criterion_group!(benches, acquire_fast_path, execute_fast_path, quota_layer_echo);
criterion_main!(benches);
