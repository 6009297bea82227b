//! Telemetry for limiter activity.
//!
//! Every limiter can forward structured [`LimiterEvent`]s to a sink: admissions,
//! queueing, provider rejections, cooldown clearing and retry decisions. Sinks are
//! `tower::Service<LimiterEvent>` implementations so they compose with standard tower
//! combinators.
//!
//! Emission is best-effort: a sink that is not ready or errors simply loses the event,
//! and the call being throttled never waits on telemetry. Wrap slow sinks in
//! [`NonBlockingSink`] so their deliveries queue behind a worker task.
//!
//! # Sinks
//!
//! - [`NullSink`]: discards everything (the default).
//! - [`LogSink`]: logs each event through `tracing`.
//! - [`MemorySink`]: keeps a bounded in-memory history, mainly for tests.

pub mod events;
pub mod sinks;

pub use events::{EventKind, LimiterEvent};
pub use sinks::{
    emit_best_effort, LogSink, MemorySink, NonBlockingSink, NullSink, SharedSink, SinkFailure,
    TelemetrySink,
};

#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
