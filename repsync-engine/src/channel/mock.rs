//! Mock channel for testing.
//!
//! Captures sent envelopes for verification and lets tests drive the
//! reachability signal and inject send failures.

use super::{Channel, ChannelError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mock channel for testing.
///
/// Captures sent messages for verification. `Clone` shares state, so a test
/// can keep a handle while the engine owns the other.
#[derive(Debug)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelInner>>,
}

#[derive(Debug)]
struct MockChannelInner {
    reachable: bool,
    sent_messages: Vec<Vec<u8>>,
    fail_next_send: Option<String>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockChannelInner {
                reachable: true,
                sent_messages: Vec::new(),
                fail_next_send: None,
            })),
        }
    }
}

impl MockChannel {
    /// Create a new mock channel with the peer reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.clone()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.last().cloned()
    }

    /// Drain all sent messages, e.g. to pump them into the peer under test.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.sent_messages)
    }

    /// Toggle the advisory reachability signal.
    pub fn set_peer_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.reachable = reachable;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Clear all captured messages and injected failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sent_messages.clear();
        inner.fail_next_send = None;
        inner.reachable = true;
    }
}

impl Clone for MockChannel {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&self, data: &[u8]) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(ChannelError::SendFailed(error));
        }

        // An unreachable peer still accepts sends; the bytes are simply lost
        // in flight. This mirrors the real transport, where reachability is
        // sampled and delivery is best-effort either way.
        inner.sent_messages.push(data.to_vec());
        Ok(())
    }

    fn is_peer_reachable(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.reachable
    }
}
