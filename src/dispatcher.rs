//! Background task that serves queued callers.
//!
//! The throttling triple (bucket, cooldown, queue) lives in one [`Throttle`] behind the
//! limiter's mutex. Callers only touch it briefly on the fast path and when queueing;
//! everything that wakes a queued caller happens here.
//!
//! State machine: `Idle` until a caller queues, which spawns the task and flips the
//! state to `Draining` under the same lock that guards the queue, so at most one
//! dispatcher exists per limiter. The task returns to `Idle` and exits as soon as the
//! queue is empty; it never idles in the background.
//!
//! Each cycle, with the lock held:
//! 1. empty queue: go `Idle`, exit;
//! 2. cooldown active: release, sleep `min(remaining, 1s)`, retry;
//! 3. refill the bucket;
//! 4. serve due waiters while tokens cover them;
//! 5. otherwise release and sleep until roughly one more waiter is affordable, bounded
//!    by `[min_wait_interval, 1s]`.

use crate::bucket::TokenBucket;
use crate::cooldown::CooldownController;
use crate::limiter::Shared;
use crate::queue::{PriorityWaitQueue, Waiter};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on any single dispatcher pause, so state changes are seen promptly.
pub const MAX_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Draining,
}

/// Shared throttling state, mutated only under the limiter's lock.
#[derive(Debug)]
pub struct Throttle {
    pub bucket: TokenBucket,
    pub cooldown: CooldownController,
    pub queue: PriorityWaitQueue,
    pub dispatcher: DispatcherState,
}

impl Throttle {
    pub fn new(bucket: TokenBucket, cooldown: CooldownController) -> Self {
        Self { bucket, cooldown, queue: PriorityWaitQueue::new(), dispatcher: DispatcherState::Idle }
    }

    /// Become the dispatcher if none is running. The winner must spawn [`run`].
    pub fn claim_dispatcher(&mut self) -> bool {
        if self.dispatcher == DispatcherState::Idle {
            self.dispatcher = DispatcherState::Draining;
            true
        } else {
            false
        }
    }
}

enum Step {
    Exit,
    Sleep(Duration),
}

/// Resets the leader flag if the task is torn down mid-drain (e.g. runtime shutdown), so
/// a later caller can start a fresh dispatcher.
struct Lease {
    shared: Arc<Shared>,
    finished: bool,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.lock().dispatcher = DispatcherState::Idle;
        }
    }
}

pub(crate) async fn run(shared: Arc<Shared>) {
    debug!(target: "quotaflow::dispatcher", limiter = %shared.name, "dispatcher started");
    let mut lease = Lease { shared, finished: false };
    loop {
        match cycle(&lease.shared) {
            Step::Exit => {
                lease.finished = true;
                debug!(target: "quotaflow::dispatcher", limiter = %lease.shared.name, "queue drained, dispatcher idle");
                return;
            }
            Step::Sleep(pause) => tokio::time::sleep(pause).await,
        }
    }
}

fn cycle(shared: &Shared) -> Step {
    let mut throttle = shared.lock();
    let now = shared.clock.now();

    if throttle.queue.is_empty() {
        throttle.dispatcher = DispatcherState::Idle;
        return Step::Exit;
    }

    if throttle.cooldown.is_active(now) {
        return Step::Sleep(throttle.cooldown.remaining(now).min(MAX_PAUSE));
    }

    throttle.bucket.refill(now);
    let threshold = shared.config.starvation_threshold();
    while let Some(key) = throttle.queue.next_due(now, threshold) {
        let needed = match throttle.queue.get(&key) {
            Some(waiter) => waiter.tokens(),
            None => break,
        };
        if !throttle.bucket.try_consume(needed) {
            let deficit = throttle.bucket.deficit_secs(needed).min(MAX_PAUSE.as_secs_f64());
            let pause = Duration::from_secs_f64(deficit).max(shared.config.min_wait_interval());
            return Step::Sleep(pause);
        }
        if let Some(waiter) = throttle.queue.remove(&key) {
            let priority = waiter.priority();
            // A closed receiver means the caller was cancelled; its ticket refunds the grant.
            let delivered = Waiter::fulfill(waiter);
            debug!(
                target: "quotaflow::dispatcher",
                limiter = %shared.name,
                priority,
                delivered,
                remaining = throttle.bucket.tokens(),
                queued = throttle.queue.len(),
                "served queued caller"
            );
        }
    }

    throttle.dispatcher = DispatcherState::Idle;
    Step::Exit
}
