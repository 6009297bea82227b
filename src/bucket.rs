//! Token bucket state and arithmetic.
//!
//! Pure state: no locking and no clock of its own. The limiter serializes access and
//! passes in clock readings, which keeps every operation deterministic under test.
//!
//! Invariant: `0 <= tokens <= capacity` after every operation.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Duration,
}

impl TokenBucket {
    /// A full bucket whose refill accounting starts at `now`.
    pub fn new(capacity: f64, refill_rate: f64, now: Duration) -> Self {
        Self { capacity, tokens: capacity, refill_rate, last_refill: now }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Credit `elapsed * refill_rate` tokens, capped at capacity.
    ///
    /// A reading at or before `last_refill` changes nothing, so repeated calls with the
    /// same `now` never double-credit.
    pub fn refill(&mut self, now: Duration) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `amount` tokens if available. On failure nothing changes.
    pub fn try_consume(&mut self, amount: f64) -> bool {
        if self.tokens >= amount {
            self.tokens = (self.tokens - amount).max(0.0);
            true
        } else {
            false
        }
    }

    /// Empty the bucket after a provider rejection; refill restarts from `now`.
    pub fn drain(&mut self, now: Duration) {
        self.refill(now);
        self.tokens = 0.0;
    }

    /// Return tokens from a grant nobody used.
    pub fn credit(&mut self, amount: f64) {
        self.tokens = (self.tokens + amount.max(0.0)).min(self.capacity);
    }

    /// What [`refill`](Self::refill) would yield at `now`, without mutating.
    pub fn available_at(&self, now: Duration) -> f64 {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    /// Seconds until `amount` tokens exist at the current refill rate.
    pub fn deficit_secs(&self, amount: f64) -> f64 {
        let missing = (amount - self.tokens).max(0.0);
        if self.refill_rate > 0.0 {
            missing / self.refill_rate
        } else {
            f64::INFINITY
        }
    }
}
