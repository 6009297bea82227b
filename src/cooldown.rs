//! Provider-imposed penalty windows.
//!
//! After the provider rejects a call for exceeding its quota, the limiter stops serving
//! anyone until the window passes. Providers often say how long to wait ("Please try
//! again in 9m21.6s"); when they do, that hint replaces the preset duration.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Added on top of any provider hint.
pub const HINT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CooldownController {
    default_duration: Duration,
    active_since: Option<Duration>,
    duration: Duration,
}

impl CooldownController {
    pub fn new(default_duration: Duration) -> Self {
        Self { default_duration, active_since: None, duration: default_duration }
    }

    /// Enter cooldown at `now`. Returns the window length chosen and whether it came
    /// from a provider hint.
    pub fn mark_rejected(&mut self, now: Duration, provider_message: &str) -> (Duration, bool) {
        self.active_since = Some(now);
        match parse_retry_hint(provider_message) {
            Some(hint) => {
                self.duration = hint;
                (hint, true)
            }
            None => {
                self.duration = self.default_duration;
                (self.default_duration, false)
            }
        }
    }

    pub fn is_active(&self, now: Duration) -> bool {
        match self.active_since {
            Some(since) => now.saturating_sub(since) < self.duration,
            None => false,
        }
    }

    pub fn remaining(&self, now: Duration) -> Duration {
        match self.active_since {
            Some(since) => self.duration.saturating_sub(now.saturating_sub(since)),
            None => Duration::ZERO,
        }
    }

    /// Whether a rejection has been recorded and not yet cleared, expired or not.
    pub fn is_marked(&self) -> bool {
        self.active_since.is_some()
    }

    /// Forget the rejection. Only a successful call should do this.
    pub fn clear(&mut self) -> bool {
        self.active_since.take().is_some()
    }

    /// Length of the current (or last) window.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

fn minutes_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)m(?:[^s]|$)").expect("static regex"))
}

fn millis_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)ms").expect("static regex"))
}

fn seconds_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)s").expect("static regex"))
}

/// Extract a "retry after" hint from a provider message.
///
/// Sums the first minutes (`9m`), seconds (`21.6s`) and milliseconds (`460ms`) figures
/// and adds [`HINT_SAFETY_MARGIN`]. `None` when no figure appears or they sum to zero.
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    let capture = |re: &Regex| -> Option<f64> {
        re.captures(message).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<f64>().ok())
    };
    let minutes = capture(minutes_pattern());
    let seconds = capture(seconds_pattern());
    let millis = capture(millis_pattern());
    if minutes.is_none() && seconds.is_none() && millis.is_none() {
        return None;
    }
    let total = minutes.unwrap_or(0.0) * 60.0
        + seconds.unwrap_or(0.0)
        + millis.unwrap_or(0.0) / 1000.0;
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(total).ok().map(|d| d + HINT_SAFETY_MARGIN)
}
