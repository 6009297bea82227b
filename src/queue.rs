//! Priority-ordered queue of blocked callers.
//!
//! Waiters are ordered by `(priority, enqueued_at, seq)`: lower priority numbers first,
//! then earlier arrivals, with the insertion sequence breaking exact ties. A second
//! index by arrival lets the dispatcher find the oldest waiter for starvation aging,
//! and keyed storage lets a cancelled caller take its own entry back out.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// Ordering key of a queued waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WaiterKey {
    pub priority: i32,
    pub enqueued_at: Duration,
    pub seq: u64,
}

/// Receiving half handed to the blocked caller.
pub type WaitSignal = oneshot::Receiver<()>;

/// A blocked caller. Served at most once, never reused.
#[derive(Debug)]
pub struct Waiter {
    priority: i32,
    enqueued_at: Duration,
    tokens: f64,
    signal: oneshot::Sender<()>,
}

impl Waiter {
    pub fn new(priority: i32, tokens: f64, enqueued_at: Duration) -> (Self, WaitSignal) {
        let (signal, rx) = oneshot::channel();
        (Self { priority, enqueued_at, tokens, signal }, rx)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn enqueued_at(&self) -> Duration {
        self.enqueued_at
    }

    /// Wake the caller. Returns `false` if it already stopped waiting.
    pub fn fulfill(self) -> bool {
        self.signal.send(()).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PriorityWaitQueue {
    by_priority: BTreeMap<WaiterKey, Waiter>,
    by_arrival: BTreeMap<u64, WaiterKey>,
    next_seq: u64,
}

impl PriorityWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, waiter: Waiter) -> WaiterKey {
        let key =
            WaiterKey { priority: waiter.priority, enqueued_at: waiter.enqueued_at, seq: self.next_seq };
        self.next_seq += 1;
        self.by_arrival.insert(key.seq, key);
        self.by_priority.insert(key, waiter);
        key
    }

    /// Highest-priority waiter, left in place.
    pub fn peek(&self) -> Option<(&WaiterKey, &Waiter)> {
        self.by_priority.iter().next()
    }

    /// Remove and return the highest-priority waiter.
    pub fn pop(&mut self) -> Option<Waiter> {
        let key = *self.by_priority.keys().next()?;
        self.remove(&key)
    }

    /// Take a specific waiter out, e.g. because its caller gave up.
    pub fn remove(&mut self, key: &WaiterKey) -> Option<Waiter> {
        let waiter = self.by_priority.remove(key)?;
        self.by_arrival.remove(&key.seq);
        Some(waiter)
    }

    pub fn get(&self, key: &WaiterKey) -> Option<&Waiter> {
        self.by_priority.get(key)
    }

    pub fn contains(&self, key: &WaiterKey) -> bool {
        self.by_priority.contains_key(key)
    }

    /// Whether anyone queued outranks `priority` (strictly lower number).
    pub fn has_higher_priority_than(&self, priority: i32) -> bool {
        self.by_priority.keys().next().is_some_and(|head| head.priority < priority)
    }

    /// The earliest-arrived waiter regardless of priority.
    pub fn oldest(&self) -> Option<&WaiterKey> {
        self.by_arrival.values().next()
    }

    /// Whether the oldest waiter has waited at least `threshold` by `now`.
    pub fn has_starving(&self, now: Duration, threshold: Option<Duration>) -> bool {
        match (threshold, self.oldest()) {
            (Some(threshold), Some(oldest)) => now.saturating_sub(oldest.enqueued_at) >= threshold,
            _ => false,
        }
    }

    /// The waiter that should be served next: the oldest one once it has starved past
    /// `threshold`, otherwise the priority head.
    pub fn next_due(&self, now: Duration, threshold: Option<Duration>) -> Option<WaiterKey> {
        if self.has_starving(now, threshold) {
            return self.oldest().copied();
        }
        self.by_priority.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.by_priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_priority.is_empty()
    }
}
