//! Tower integration: run every request of a service through a [`RateLimiter`].
//!
//! Each request is admitted by the limiter and retried on provider rejections exactly
//! like [`RateLimiter::execute_with_retry`], so the request type must be `Clone`.
//!
//! ```rust
//! use quotaflow::{Provider, QuotaLayer, RateLimiter};
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::new("groq", Provider::Groq);
//! let svc = QuotaLayer::new(limiter)
//!     .layer(service_fn(|prompt: String| async move { Ok::<_, std::io::Error>(prompt.len()) }));
//! assert_eq!(svc.oneshot("hello".to_string()).await.unwrap(), 5);
//! # }
//! ```

use crate::config::CallOptions;
use crate::error::LimiterError;
use crate::limiter::RateLimiter;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// A layer that admits requests through a [`RateLimiter`].
#[derive(Clone, Debug)]
pub struct QuotaLayer {
    limiter: RateLimiter,
    options: CallOptions,
}

impl QuotaLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter, options: CallOptions::default() }
    }

    /// Token cost, priority and retry settings applied to every request.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

impl<S> Layer<S> for QuotaLayer {
    type Service = QuotaService<S>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService { inner: service, limiter: self.limiter.clone(), options: self.options.clone() }
    }
}

/// Middleware service produced by [`QuotaLayer`].
#[derive(Clone, Debug)]
pub struct QuotaService<S> {
    inner: S,
    limiter: RateLimiter,
    options: CallOptions,
}

impl<S> QuotaService<S> {
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl<S, Req> Service<Req> for QuotaService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    Req: Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = LimiterError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Each attempt drives readiness on its own clone of the inner service.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let options = self.options.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            limiter
                .execute_with_retry(options, move || {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { svc.oneshot(req).await }
                })
                .await
        })
    }
}
