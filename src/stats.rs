//! Operator-facing counters.
//!
//! Counters only ever grow; [`LimiterStats::reset`] is the single explicit way to zero
//! them. Each counter is its own atomic, so a [`StatsSnapshot`] is not guaranteed to be
//! consistent across fields while calls are in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct LimiterStats {
    acquired: AtomicU64,
    waited: AtomicU64,
    total_wait_nanos: AtomicU64,
    rejection_hits: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_calls: AtomicU64,
}

impl LimiterStats {
    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.waited.fetch_add(1, Ordering::Relaxed);
        self.total_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Returns the cumulative rejection count including this one.
    pub(crate) fn record_rejection(&self) -> u64 {
        self.rejection_hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejection_hits(&self) -> u64 {
        self.rejection_hits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
            total_wait_time: Duration::from_nanos(self.total_wait_nanos.load(Ordering::Relaxed)),
            rejection_hits: self.rejection_hits.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_calls: self.total_calls.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Operator action only.
    pub fn reset(&self) {
        for counter in [
            &self.acquired,
            &self.waited,
            &self.total_wait_nanos,
            &self.rejection_hits,
            &self.successes,
            &self.failures,
            &self.total_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`LimiterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatsSnapshot {
    pub acquired: u64,
    pub waited: u64,
    pub total_wait_time: Duration,
    pub rejection_hits: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_calls: u64,
}

impl StatsSnapshot {
    /// Successful calls as a percentage of all calls; `0.0` before the first call.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total_calls as f64 * 100.0
    }

    /// Mean time spent queued by callers that had to wait.
    pub fn average_wait(&self) -> Duration {
        if self.waited == 0 {
            return Duration::ZERO;
        }
        self.total_wait_time / u32::try_from(self.waited).unwrap_or(u32::MAX)
    }
}
