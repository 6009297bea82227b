use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// An event emitted by a named limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterEvent {
    /// Name the limiter was created with.
    pub limiter: Arc<str>,
    pub kind: EventKind,
}

impl LimiterEvent {
    pub fn new(limiter: Arc<str>, kind: EventKind) -> Self {
        Self { limiter, kind }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A caller was admitted.
    Acquired {
        priority: i32,
        tokens: f64,
        /// Time spent queued; zero on the fast path.
        waited: Duration,
    },
    /// A caller had to queue.
    Queued {
        priority: i32,
        /// Queue length including this caller.
        depth: usize,
    },
    /// A queued caller gave up before being served.
    TimedOut { priority: i32, waited: Duration },
    /// The provider throttled a call; the limiter entered cooldown.
    Rejected {
        cooldown: Duration,
        /// Whether the cooldown came from the provider's own hint.
        hinted: bool,
        total_rejections: u64,
    },
    /// A successful call ended a cooldown.
    CooldownCleared,
    /// A throttled call will be retried after `delay`.
    RetryScheduled { retry: u32, delay: Duration },
    /// Retries ran out while the provider kept throttling.
    Exhausted { retries: u32, rejections: u32 },
    /// The wrapped call succeeded.
    Succeeded { attempts: u32 },
    /// The wrapped call failed for a non-throttling reason.
    Failed { attempts: u32 },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.limiter, self.kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Acquired { priority, tokens, waited } => {
                write!(f, "Acquired(p={}, tokens={}, waited={:?})", priority, tokens, waited)
            }
            EventKind::Queued { priority, depth } => {
                write!(f, "Queued(p={}, depth={})", priority, depth)
            }
            EventKind::TimedOut { priority, waited } => {
                write!(f, "TimedOut(p={}, waited={:?})", priority, waited)
            }
            EventKind::Rejected { cooldown, hinted, total_rejections } => write!(
                f,
                "Rejected(cooldown={:?}, hinted={}, total={})",
                cooldown, hinted, total_rejections
            ),
            EventKind::CooldownCleared => write!(f, "CooldownCleared"),
            EventKind::RetryScheduled { retry, delay } => {
                write!(f, "RetryScheduled(#{}, delay={:?})", retry, delay)
            }
            EventKind::Exhausted { retries, rejections } => {
                write!(f, "Exhausted(retries={}, rejections={})", retries, rejections)
            }
            EventKind::Succeeded { attempts } => write!(f, "Succeeded(attempts={})", attempts),
            EventKind::Failed { attempts } => write!(f, "Failed(attempts={})", attempts),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a [`LimiterEvent`] into a JSON value for log shippers.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    let limiter = event.limiter.as_ref();
    match &event.kind {
        EventKind::Acquired { priority, tokens, waited } => json!({
            "kind": "acquired",
            "limiter": limiter,
            "priority": *priority,
            "tokens": *tokens,
            "waited_ms": clamp_u64(waited.as_millis()),
        }),
        EventKind::Queued { priority, depth } => json!({
            "kind": "queued",
            "limiter": limiter,
            "priority": *priority,
            "depth": *depth,
        }),
        EventKind::TimedOut { priority, waited } => json!({
            "kind": "timed_out",
            "limiter": limiter,
            "priority": *priority,
            "waited_ms": clamp_u64(waited.as_millis()),
        }),
        EventKind::Rejected { cooldown, hinted, total_rejections } => json!({
            "kind": "rejected",
            "limiter": limiter,
            "cooldown_ms": clamp_u64(cooldown.as_millis()),
            "hinted": *hinted,
            "total_rejections": *total_rejections,
        }),
        EventKind::CooldownCleared => json!({ "kind": "cooldown_cleared", "limiter": limiter }),
        EventKind::RetryScheduled { retry, delay } => json!({
            "kind": "retry_scheduled",
            "limiter": limiter,
            "retry": *retry,
            "delay_ms": clamp_u64(delay.as_millis()),
        }),
        EventKind::Exhausted { retries, rejections } => json!({
            "kind": "exhausted",
            "limiter": limiter,
            "retries": *retries,
            "rejections": *rejections,
        }),
        EventKind::Succeeded { attempts } => {
            json!({ "kind": "succeeded", "limiter": limiter, "attempts": *attempts })
        }
        EventKind::Failed { attempts } => {
            json!({ "kind": "failed", "limiter": limiter, "attempts": *attempts })
        }
    }
}
