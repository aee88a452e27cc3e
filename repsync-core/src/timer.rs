//! Rest timer anchor model.
//!
//! Both devices run their own countdown loop off the same two anchors
//! (duration, start instant) received in the last snapshot. Remaining time
//! is always a pure function of `now`; no tick ever crosses the wire, so
//! message latency cannot desynchronize the visible countdown.

use std::time::Duration;

use repsync_types::Timestamp;

/// A running rest countdown, represented only by its anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestTimer {
    duration_secs: u32,
    started_at: Timestamp,
}

impl RestTimer {
    /// Start a timer with the given duration at `now`.
    pub fn start(duration_secs: u32, now: Timestamp) -> Self {
        Self {
            duration_secs,
            started_at: now,
        }
    }

    /// Rebuild a timer from anchors received in a snapshot.
    pub fn from_anchors(duration_secs: u32, started_at: Timestamp) -> Self {
        Self {
            duration_secs,
            started_at,
        }
    }

    /// The rest duration anchor, in seconds.
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// The start instant anchor.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Time left on the countdown at `now`, clamped at zero.
    pub fn remaining(&self, now: Timestamp) -> Duration {
        let total_ms = u64::from(self.duration_secs) * 1_000;
        let elapsed_ms = now.millis_since(self.started_at);
        Duration::from_millis(total_ms.saturating_sub(elapsed_ms))
    }

    /// Whether the countdown has reached zero at `now`.
    pub fn is_finished(&self, now: Timestamp) -> bool {
        self.remaining(now).is_zero()
    }
}
