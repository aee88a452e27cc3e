//! Message channel abstraction for repsync.
//!
//! This module provides a pluggable channel layer that abstracts the
//! physical transport moving envelope bytes between the two devices
//! (platform wearable bridge, BLE, mock for testing).
//!
//! # Design
//!
//! The channel is connectionless and best-effort:
//! - `send()` transmits envelope bytes, fire-and-forget
//! - `is_peer_reachable()` is an advisory signal only
//!
//! Delivery may be delayed, dropped or duplicated; the protocol tolerates
//! all three (idempotent snapshots, sequence-numbered application). The
//! reachability signal never gates a local mutation - an unreachable peer
//! simply misses updates until the next snapshot makes it consistent.

mod mock;

pub use mock::MockChannel;

use async_trait::async_trait;
use thiserror::Error;

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Channel closed.
    #[error("channel closed")]
    Closed,
}

/// Channel trait for sending session protocol messages to the peer device.
///
/// Implementations handle the underlying delivery mechanism. Incoming
/// traffic does not flow through this trait; the embedding application
/// feeds received bytes to `Coordinator::handle_incoming` /
/// `Mirror::handle_incoming` on its own receive path.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send envelope bytes to the peer, best-effort.
    async fn send(&self, data: &[u8]) -> Result<(), ChannelError>;

    /// Whether the peer is currently believed reachable.
    ///
    /// Advisory only; callers must not gate mutations on it.
    fn is_peer_reachable(&self) -> bool;
}
