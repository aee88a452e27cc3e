//! Reentrancy guard against update feedback loops.
//!
//! While a device is applying an inbound message, any outbound send that
//! would read as a *new intent* is suppressed. The snapshot a coordinator
//! emits in response to a remote action still goes out, tagged as a reply,
//! because it belongs to the same causal chain. This is the load-bearing
//! invariant that keeps two devices from echoing updates at each other
//! forever.

use std::sync::atomic::{AtomicBool, Ordering};

/// Flag marking "currently applying an inbound message".
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    receiving: AtomicBool,
}

impl ReentrancyGuard {
    /// Create a disengaged guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage the guard for the duration of the returned token.
    pub fn enter(&self) -> GuardToken<'_> {
        self.receiving.store(true, Ordering::SeqCst);
        GuardToken { guard: self }
    }

    /// Whether an inbound message is currently being applied.
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }
}

/// RAII token holding the guard engaged; dropping it disengages.
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.receiving.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disengaged() {
        let guard = ReentrancyGuard::new();
        assert!(!guard.is_receiving());
    }

    #[test]
    fn engaged_while_token_lives() {
        let guard = ReentrancyGuard::new();

        {
            let _token = guard.enter();
            assert!(guard.is_receiving());
        }

        assert!(!guard.is_receiving());
    }

    #[test]
    fn reusable_after_drop() {
        let guard = ReentrancyGuard::new();

        drop(guard.enter());
        let _token = guard.enter();
        assert!(guard.is_receiving());
    }
}
