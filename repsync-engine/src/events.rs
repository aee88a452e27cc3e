//! Events emitted to the embedding application.
//!
//! The engine replaces implicit reactive dependency tracking with one
//! explicit event per mutation: whatever rendering layer exists subscribes
//! to the receiver returned at construction and redraws from the snapshot.

use repsync_types::{LiveSnapshot, SessionId};
use tokio::sync::mpsc;

/// Events emitted by a [`Coordinator`] or [`Mirror`].
///
/// [`Coordinator`]: crate::Coordinator
/// [`Mirror`]: crate::Mirror
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session state changed; redraw from this snapshot.
    ///
    /// Emitted exactly once per mutation.
    SnapshotChanged(LiveSnapshot),
    /// The local rest countdown reached zero.
    ///
    /// A local-only cue (haptic/visual); never synchronized with the peer,
    /// which detects its own completion off the same anchors.
    TimerFinished,
    /// The peer tried to start a session while one is active locally.
    ///
    /// Surfaced as a user-visible choice; the engine never auto-resolves it
    /// by overwriting in-progress work.
    Conflict {
        /// The locally active session.
        ours: SessionId,
        /// The session the peer tried to open.
        theirs: SessionId,
    },
    /// The session was closed.
    Ended {
        /// Identity of the closed session.
        session_id: SessionId,
        /// Whether the record was handed to the store (false for cancel
        /// and for a store that refused the record).
        persisted: bool,
    },
}

/// Sending half used inside the engine; emission never blocks and a dropped
/// receiver is not an error.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub(crate) fn emit(&self, event: SessionEvent) {
        // The embedder may have dropped its receiver; state stays correct
        // without any listener.
        let _ = self.tx.send(event);
    }
}

/// Create the event pipe handed out at engine construction.
pub(crate) fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
