//! Engine configuration.

use std::time::Duration;

/// Configuration shared by [`Coordinator`] and [`Mirror`].
///
/// [`Coordinator`]: crate::Coordinator
/// [`Mirror`]: crate::Mirror
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Human-readable device name, used in logs.
    pub device_name: String,
    /// Pause between applying a remote action and sending the follow-up
    /// snapshot, so the lighter action finishes transiting first.
    ///
    /// Ordering is guaranteed by snapshot sequence numbers; this delay only
    /// reduces how often a receiver sees (and discards) out-of-order
    /// arrivals.
    pub snapshot_response_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "repsync device".to_string(),
            snapshot_response_delay: Duration::from_millis(30),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device name.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = name.to_string();
        self
    }

    /// Set the action-to-snapshot response delay.
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.snapshot_response_delay = delay;
        self
    }
}
