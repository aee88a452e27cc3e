//! The authoritative session owner.
//!
//! The coordinator is the only component allowed to decide the result of a
//! session transition. Local user intents mutate the authoritative state
//! immediately and broadcast a snapshot; remote intents are re-derived
//! against the authoritative queue and answered with a snapshot tagged as a
//! reply. All mutation is serialized behind one `tokio::sync::Mutex`, so no
//! two transitions race inside the device.

use repsync_core::ActiveSession;
use repsync_types::{
    Action, DeviceId, Envelope, ExercisePlan, LiveSnapshot, MessageType, SessionId, SessionPhase,
    SessionSeed, Timestamp,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::events::{event_channel, EventSender, SessionEvent};
use crate::guard::ReentrancyGuard;
use crate::store::SessionStore;

/// Session lifecycle errors reported to the caller.
///
/// Everything else that can go wrong with inbound traffic is recovered
/// locally (logged and dropped); nothing here is fatal.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already active on this device.
    #[error("a session is already active")]
    AlreadyActive,
}

/// State behind the coordinator's single mutation lock.
#[derive(Debug)]
struct CoordinatorState {
    session: Option<ActiveSession>,
    /// Pre-allocated identity for the next session, so a stale old identity
    /// can never be mistaken for a new one.
    next_session_id: SessionId,
    /// Start anchor of the timer run that already fired its local cue.
    timer_fired_anchor: Option<Timestamp>,
}

/// What applying a remote action decided, computed under the lock and acted
/// on after it is released.
enum RemoteOutcome {
    /// Answer with the authoritative state.
    Respond(LiveSnapshot),
    /// The session closed; answer, then persist or discard.
    Close {
        snapshot: LiveSnapshot,
        session: Box<ActiveSession>,
        persist: bool,
    },
    /// A foreign session start was rejected.
    Conflict { ours: SessionId, theirs: SessionId },
    /// Nothing changed and nothing needs to be sent.
    Ignored,
}

/// The authoritative device-side owner of session state.
pub struct Coordinator<C: Channel, S: SessionStore> {
    config: EngineConfig,
    device_id: DeviceId,
    channel: C,
    store: S,
    state: Mutex<CoordinatorState>,
    guard: ReentrancyGuard,
    events: EventSender,
}

impl<C: Channel, S: SessionStore> Coordinator<C, S> {
    /// Create a coordinator and the event receiver the embedder subscribes
    /// to.
    pub fn new(
        config: EngineConfig,
        channel: C,
        store: S,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = event_channel();
        let coordinator = Self {
            config,
            device_id: DeviceId::random(),
            channel,
            store,
            state: Mutex::new(CoordinatorState {
                session: None,
                next_session_id: SessionId::new(),
                timer_fired_anchor: None,
            }),
            guard: ReentrancyGuard::new(),
            events,
        };
        (coordinator, rx)
    }

    /// This device's identity.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// The active session identity, if any.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session.as_ref().map(|s| s.id())
    }

    /// Whether a session is currently active.
    pub async fn is_session_active(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Get a reference to the underlying channel (for testing).
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Open a new session from ordered exercise plans.
    ///
    /// Applies locally regardless of peer reachability; an unreachable peer
    /// catches up from the next snapshot it receives.
    pub async fn start_session(
        &self,
        plans: Vec<ExercisePlan>,
    ) -> Result<SessionId, SessionError> {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let session_id = state.next_session_id;
        state.next_session_id = SessionId::new();

        let seed = SessionSeed {
            session_id,
            started_at: now,
            plans,
        };
        let mut session = ActiveSession::start(seed, now);
        let timer_running = session.timer().is_some();
        let snapshot = session.snapshot(SessionPhase::Active);
        state.session = Some(session);
        state.timer_fired_anchor = None;
        drop(state);

        tracing::info!(%session_id, device = %self.config.device_name, "session started");
        self.emit_and_broadcast(snapshot, timer_running).await;
        Ok(session_id)
    }

    /// Commit the in-progress set and move to the next one.
    pub async fn advance_set(&self) {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        state.timer_fired_anchor = None;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.advance_set(now);
        let timer_running = session.timer().is_some();
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, timer_running).await;
    }

    /// Un-commit the most recent set back into the editable fields.
    ///
    /// Broadcasts even when there was nothing to pop, so both devices
    /// settle on the same state.
    pub async fn retreat_set(&self) {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        state.timer_fired_anchor = None;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.retreat_set(now);
        let timer_running = session.timer().is_some();
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, timer_running).await;
    }

    /// Finish the current exercise and promote the next one.
    pub async fn advance_exercise(&self) {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        state.timer_fired_anchor = None;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.advance_exercise(now);
        let timer_running = session.timer().is_some();
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, timer_running).await;
    }

    /// Return to the previously completed exercise.
    pub async fn retreat_exercise(&self) {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.retreat_exercise();
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, false).await;
    }

    /// Change the editable rep target for the in-progress set.
    pub async fn update_reps(&self, reps: u32) {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        if !session.update_reps(reps) {
            return; // unchanged: no broadcast
        }
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, false).await;
    }

    /// Change the editable weight for the in-progress set.
    pub async fn update_weight(&self, weight: f64) {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        if !session.update_weight(weight) {
            return; // unchanged: no broadcast
        }
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, false).await;
    }

    /// Change the rest duration for the in-progress set.
    pub async fn update_rest(&self, rest_secs: u32) {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return;
        };
        if !session.update_rest(rest_secs) {
            return; // unchanged: no broadcast
        }
        let snapshot = session.snapshot(SessionPhase::Active);
        drop(state);

        self.emit_and_broadcast(snapshot, false).await;
    }

    /// Close the session and hand the record to the store.
    pub async fn end_session(&self) {
        let Some((snapshot, session)) = self.close_locally(SessionPhase::Completed).await else {
            return;
        };
        self.events
            .emit(SessionEvent::SnapshotChanged(snapshot.clone()));
        self.send_snapshot(&snapshot, false).await;
        self.persist_closed(*session).await;
    }

    /// Close the session and ask the store to discard it.
    pub async fn cancel_session(&self) {
        let Some((snapshot, session)) = self.close_locally(SessionPhase::Cancelled).await else {
            return;
        };
        self.events
            .emit(SessionEvent::SnapshotChanged(snapshot.clone()));
        self.send_snapshot(&snapshot, false).await;
        self.discard_closed(session.id()).await;
    }

    /// Feed bytes received from the peer into the coordinator.
    ///
    /// A malformed message is logged and dropped; it must never crash the
    /// coordinator.
    pub async fn handle_incoming(&self, bytes: &[u8]) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!("dropping malformed message: {err}");
                return;
            }
        };
        if envelope.sender == self.device_id {
            tracing::debug!("ignoring our own reflected message");
            return;
        }
        match envelope.message_type() {
            Ok(MessageType::Action) => match envelope.decode_action() {
                Ok(action) => self.apply_remote_action(action, envelope.session_id).await,
                Err(err) => tracing::warn!("dropping undecodable action: {err}"),
            },
            Ok(MessageType::Snapshot) => {
                // Only the coordinator is authoritative; a peer snapshot
                // carries nothing it needs.
                tracing::debug!("coordinator ignores peer snapshots");
            }
            Err(err) => tracing::warn!("dropping message with unknown type: {err}"),
        }
    }

    /// Re-derive a remote intent against the authoritative queue.
    ///
    /// The reentrancy guard is engaged for the whole application, so no
    /// intent-originated send can escape; the answering snapshot goes out
    /// afterwards, tagged as a reply, following the configured short delay.
    pub async fn apply_remote_action(&self, action: Action, identity: SessionId) {
        let outcome = self.apply_under_guard(action, identity).await;
        match outcome {
            RemoteOutcome::Respond(snapshot) => {
                self.events
                    .emit(SessionEvent::SnapshotChanged(snapshot.clone()));
                tokio::time::sleep(self.config.snapshot_response_delay).await;
                self.send_snapshot(&snapshot, true).await;
            }
            RemoteOutcome::Close {
                snapshot,
                session,
                persist,
            } => {
                self.events
                    .emit(SessionEvent::SnapshotChanged(snapshot.clone()));
                tokio::time::sleep(self.config.snapshot_response_delay).await;
                self.send_snapshot(&snapshot, true).await;
                if persist {
                    self.persist_closed(*session).await;
                } else {
                    self.discard_closed(session.id()).await;
                }
            }
            RemoteOutcome::Conflict { ours, theirs } => {
                tracing::info!(%ours, %theirs, "remote session start conflicts with active session");
                self.events.emit(SessionEvent::Conflict { ours, theirs });
            }
            RemoteOutcome::Ignored => {}
        }
    }

    /// Signal that the local rest countdown reached zero, at most once per
    /// timer run. Driven by the embedder's display tick.
    pub async fn check_timer(&self, now: Timestamp) {
        let mut state = self.state.lock().await;
        let anchor = match state.session.as_ref().and_then(|s| s.timer()) {
            Some(timer) if timer.is_finished(now) => timer.started_at(),
            _ => return,
        };
        if state.timer_fired_anchor == Some(anchor) {
            return;
        }
        state.timer_fired_anchor = Some(anchor);
        drop(state);
        self.events.emit(SessionEvent::TimerFinished);
    }

    /// Apply one remote action while the guard is engaged.
    async fn apply_under_guard(&self, action: Action, identity: SessionId) -> RemoteOutcome {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let _token = self.guard.enter();

        // StartSession is the one action allowed to carry a foreign
        // identity: it is how the peer opens a brand-new session.
        if let Action::StartSession(seed) = action {
            return match state.session.as_mut() {
                None => {
                    let mut session = ActiveSession::start(seed, now);
                    let snapshot = session.snapshot(SessionPhase::Active);
                    tracing::info!(session_id = %session.id(), "adopted session started by peer");
                    state.session = Some(session);
                    state.timer_fired_anchor = None;
                    RemoteOutcome::Respond(snapshot)
                }
                Some(session) if session.id() == seed.session_id => {
                    // Duplicate delivery; answer with current state
                    RemoteOutcome::Respond(session.snapshot(SessionPhase::Active))
                }
                Some(session) => RemoteOutcome::Conflict {
                    ours: session.id(),
                    theirs: seed.session_id,
                },
            };
        }

        match state.session.as_ref() {
            None => {
                tracing::debug!(%identity, "dropping remote action: no active session");
                return RemoteOutcome::Ignored;
            }
            Some(session) if session.id() != identity => {
                tracing::debug!(ours = %session.id(), theirs = %identity, "dropping remote action: identity mismatch");
                return RemoteOutcome::Ignored;
            }
            Some(_) => {}
        }

        if matches!(action, Action::EndSession | Action::CancelSession) {
            let persist = matches!(action, Action::EndSession);
            let Some(mut session) = state.session.take() else {
                return RemoteOutcome::Ignored;
            };
            let phase = if persist {
                session.finalize();
                SessionPhase::Completed
            } else {
                SessionPhase::Cancelled
            };
            let snapshot = session.snapshot(phase);
            state.next_session_id = SessionId::new();
            state.timer_fired_anchor = None;
            return RemoteOutcome::Close {
                snapshot,
                session: Box::new(session),
                persist,
            };
        }

        let Some(session) = state.session.as_mut() else {
            return RemoteOutcome::Ignored;
        };
        match action {
            Action::NextSet => {
                session.advance_set(now);
                state.timer_fired_anchor = None;
            }
            Action::PreviousSet => {
                session.retreat_set(now);
                state.timer_fired_anchor = None;
            }
            Action::NextExercise => {
                session.advance_exercise(now);
                state.timer_fired_anchor = None;
            }
            Action::PreviousExercise => session.retreat_exercise(),
            Action::UpdateReps { reps } => {
                if !session.update_reps(reps) {
                    return RemoteOutcome::Ignored;
                }
            }
            Action::UpdateWeight { weight } => {
                if !session.update_weight(weight) {
                    return RemoteOutcome::Ignored;
                }
            }
            Action::UpdateRest { rest_secs } => {
                if !session.update_rest(rest_secs) {
                    return RemoteOutcome::Ignored;
                }
            }
            Action::TimerStarted => {
                session.restart_timer(now);
                state.timer_fired_anchor = None;
            }
            // Start/end/cancel were handled above
            Action::StartSession(_) | Action::EndSession | Action::CancelSession => {
                return RemoteOutcome::Ignored;
            }
        }
        RemoteOutcome::Respond(session.snapshot(SessionPhase::Active))
    }

    /// Tear down the active session, returning its closing snapshot.
    async fn close_locally(
        &self,
        phase: SessionPhase,
    ) -> Option<(LiveSnapshot, Box<ActiveSession>)> {
        let mut state = self.state.lock().await;
        let mut session = state.session.take()?;
        if phase == SessionPhase::Completed {
            session.finalize();
        }
        let snapshot = session.snapshot(phase);
        state.next_session_id = SessionId::new();
        state.timer_fired_anchor = None;
        drop(state);
        tracing::info!(session_id = %session.id(), ?phase, "session closed");
        Some((snapshot, Box::new(session)))
    }

    async fn persist_closed(&self, session: ActiveSession) {
        let session_id = session.id();
        let record = session.into_record(Timestamp::now());
        let persisted = match self.store.persist(record).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%session_id, "failed to persist session: {err}");
                false
            }
        };
        self.events.emit(SessionEvent::Ended {
            session_id,
            persisted,
        });
    }

    async fn discard_closed(&self, session_id: SessionId) {
        if let Err(err) = self.store.discard(session_id).await {
            tracing::warn!(%session_id, "failed to discard session: {err}");
        }
        self.events.emit(SessionEvent::Ended {
            session_id,
            persisted: false,
        });
    }

    /// Emit the mutation event and broadcast to the peer.
    ///
    /// `timer_restarted` additionally sends the lightweight TimerStarted
    /// action so a lagging peer zeroes its countdown display before the
    /// heavier snapshot lands.
    async fn emit_and_broadcast(&self, snapshot: LiveSnapshot, timer_restarted: bool) {
        self.events
            .emit(SessionEvent::SnapshotChanged(snapshot.clone()));
        if timer_restarted {
            self.send_action(snapshot.session_id, &Action::TimerStarted)
                .await;
        }
        self.send_snapshot(&snapshot, false).await;
    }

    /// Send an intent action, unless the guard is engaged.
    async fn send_action(&self, session_id: SessionId, action: &Action) {
        if self.guard.is_receiving() {
            tracing::debug!("suppressing action send while applying a remote message");
            return;
        }
        let bytes = match Envelope::action(self.device_id, session_id, action)
            .and_then(|envelope| envelope.to_bytes())
        {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("failed to encode action: {err}");
                return;
            }
        };
        if let Err(err) = self.channel.send(&bytes).await {
            // Fire-and-forget: the next snapshot re-syncs the peer
            tracing::warn!("action send failed: {err}");
        }
    }

    /// Send a snapshot. Intent snapshots are suppressed while the guard is
    /// engaged; replies belong to the inbound causal chain and go through.
    async fn send_snapshot(&self, snapshot: &LiveSnapshot, reply: bool) {
        if !reply && self.guard.is_receiving() {
            tracing::debug!("suppressing snapshot send while applying a remote message");
            return;
        }
        let bytes = match Envelope::snapshot(self.device_id, snapshot, reply)
            .and_then(|envelope| envelope.to_bytes())
        {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("failed to encode snapshot: {err}");
                return;
            }
        };
        if let Err(err) = self.channel.send(&bytes).await {
            tracing::warn!("snapshot send failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::store::MemoryStore;
    use repsync_types::SetTemplate;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig::new()
            .with_device_name("phone")
            .with_response_delay(Duration::ZERO)
    }

    fn plan(name: &str, rows: &[(u32, f64, u32)]) -> ExercisePlan {
        ExercisePlan {
            name: name.into(),
            planned_sets: rows.len() as u32,
            template: rows
                .iter()
                .map(|&(reps, weight, rest_secs)| SetTemplate {
                    reps,
                    weight,
                    rest_secs,
                })
                .collect(),
            auto_adjust_weights: true,
        }
    }

    fn two_exercise_plans() -> Vec<ExercisePlan> {
        vec![
            plan("E1", &[(10, 60.0, 90), (8, 70.0, 120), (6, 75.0, 120)]),
            plan("E2", &[(12, 20.0, 60), (12, 20.0, 60)]),
        ]
    }

    fn setup() -> (
        Coordinator<MockChannel, MemoryStore>,
        MockChannel,
        MemoryStore,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let channel = MockChannel::new();
        let store = MemoryStore::new();
        let (coordinator, rx) = Coordinator::new(test_config(), channel.clone(), store.clone());
        (coordinator, channel, store, rx)
    }

    fn decode_all(channel: &MockChannel) -> Vec<Envelope> {
        channel
            .sent_messages()
            .iter()
            .map(|bytes| Envelope::from_bytes(bytes).unwrap())
            .collect()
    }

    fn snapshots_of(envelopes: &[Envelope]) -> Vec<LiveSnapshot> {
        envelopes
            .iter()
            .filter(|e| e.message_type().unwrap() == MessageType::Snapshot)
            .map(|e| e.decode_snapshot().unwrap())
            .collect()
    }

    fn remote_action_bytes(session_id: SessionId, action: &Action) -> Vec<u8> {
        Envelope::action(DeviceId::random(), session_id, action)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    // ===========================================
    // Session Lifecycle Tests
    // ===========================================

    #[tokio::test]
    async fn start_session_broadcasts_snapshot() {
        let (coordinator, channel, _store, _rx) = setup();

        coordinator.start_session(two_exercise_plans()).await.unwrap();

        let sent = decode_all(&channel);
        let snapshots = snapshots_of(&sent);
        assert_eq!(snapshots.len(), 1);
        let current = snapshots[0].current.as_ref().unwrap();
        assert_eq!(current.name, "E1");
        assert_eq!(current.total_sets, 3);
        assert_eq!(current.set_index, 1);
        assert_eq!(snapshots[0].upcoming_names, vec!["E2".to_string()]);
        assert_eq!(snapshots[0].phase, SessionPhase::Active);
    }

    #[tokio::test]
    async fn start_session_twice_fails() {
        let (coordinator, _channel, _store, _rx) = setup();

        coordinator.start_session(two_exercise_plans()).await.unwrap();
        let result = coordinator.start_session(two_exercise_plans()).await;

        assert!(matches!(result, Err(SessionError::AlreadyActive)));
    }

    #[tokio::test]
    async fn start_applies_locally_while_peer_unreachable() {
        let (coordinator, channel, _store, _rx) = setup();
        channel.set_peer_reachable(false);

        coordinator.start_session(two_exercise_plans()).await.unwrap();

        assert!(coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn end_session_persists_and_clears() {
        let (coordinator, channel, store, mut rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.advance_set().await;
        channel.take_sent();

        coordinator.end_session().await;

        // Final snapshot carries the Completed phase
        let snapshots = snapshots_of(&decode_all(&channel));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].phase, SessionPhase::Completed);

        // One record handed to the store, state cleared
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, session_id);
        assert_eq!(records[0].exercises.len(), 1);
        assert_eq!(records[0].exercises[0].completed_reps, vec![10]);
        assert!(!coordinator.is_session_active().await);

        // Ended event reports persistence
        let mut saw_ended = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Ended {
                session_id: id,
                persisted,
            } = event
            {
                assert_eq!(id, session_id);
                assert!(persisted);
                saw_ended = true;
            }
        }
        assert!(saw_ended);
    }

    #[tokio::test]
    async fn cancel_session_discards() {
        let (coordinator, channel, store, _rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.advance_set().await;
        channel.take_sent();

        coordinator.cancel_session().await;

        let snapshots = snapshots_of(&decode_all(&channel));
        assert_eq!(snapshots[0].phase, SessionPhase::Cancelled);
        assert!(store.records().is_empty());
        assert_eq!(store.discards(), vec![session_id]);
        assert!(!coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn next_session_gets_fresh_identity() {
        let (coordinator, _channel, _store, _rx) = setup();
        let first = coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.end_session().await;

        let second = coordinator.start_session(two_exercise_plans()).await.unwrap();

        assert_ne!(first, second);
    }

    // ===========================================
    // Local Intent Tests
    // ===========================================

    #[tokio::test]
    async fn advance_set_sends_timer_started_then_snapshot() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator.advance_set().await;

        let sent = decode_all(&channel);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].decode_action().unwrap(), Action::TimerStarted);
        let snapshot = sent[1].decode_snapshot().unwrap();
        let current = snapshot.current.unwrap();
        assert_eq!(current.set_index, 2);
        assert_eq!(current.completed_reps, vec![10]);
        // Auto-adjust snapped the next target to the template row
        assert_eq!(current.weight, 70.0);
    }

    #[tokio::test]
    async fn three_sets_then_advance_exercise() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();

        coordinator.advance_set().await;
        coordinator.advance_set().await;
        coordinator.advance_set().await;
        channel.take_sent();
        coordinator.advance_exercise().await;

        let snapshots = snapshots_of(&decode_all(&channel));
        let current = snapshots[0].current.as_ref().unwrap();
        assert_eq!(current.name, "E2");
        assert_eq!(current.set_index, 1);
        assert!(snapshots[0].upcoming_names.is_empty());
    }

    #[tokio::test]
    async fn advance_past_last_exercise_goes_idle_but_open() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator
            .start_session(vec![plan("E1", &[(10, 60.0, 90)])])
            .await
            .unwrap();
        channel.take_sent();

        coordinator.advance_exercise().await;

        let snapshots = snapshots_of(&decode_all(&channel));
        assert!(snapshots[0].current.is_none());
        assert_eq!(snapshots[0].phase, SessionPhase::Active);
        assert!(coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn update_weight_same_value_emits_nothing() {
        let (coordinator, channel, _store, mut rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();
        while rx.try_recv().is_ok() {}

        // The seeded weight for E1 set 1 is 60.0
        coordinator.update_weight(60.0).await;

        assert!(channel.sent_messages().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_weight_new_value_broadcasts() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator.update_weight(62.5).await;

        let snapshots = snapshots_of(&decode_all(&channel));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].current.as_ref().unwrap().weight, 62.5);
    }

    #[tokio::test]
    async fn snapshot_seq_increases_per_mutation() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.advance_set().await;
        coordinator.update_reps(9).await;

        let snapshots = snapshots_of(&decode_all(&channel));
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots[0].seq < snapshots[1].seq);
        assert!(snapshots[1].seq < snapshots[2].seq);
    }

    #[tokio::test]
    async fn retreat_then_advance_restores_exercise() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.advance_exercise().await;
        channel.take_sent();

        coordinator.retreat_exercise().await;

        let snapshots = snapshots_of(&decode_all(&channel));
        let current = snapshots[0].current.as_ref().unwrap();
        assert_eq!(current.name, "E1");
        assert_eq!(snapshots[0].upcoming_names, vec!["E2".to_string()]);
    }

    // ===========================================
    // Remote Action Tests
    // ===========================================

    #[tokio::test]
    async fn remote_action_yields_single_reply_snapshot() {
        // No-loop property: one inbound action, at most one outbound
        // snapshot, never a recursive action.
        let (coordinator, channel, _store, _rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator
            .handle_incoming(&remote_action_bytes(session_id, &Action::NextSet))
            .await;

        let sent = decode_all(&channel);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type().unwrap(), MessageType::Snapshot);
        assert!(sent[0].reply);
        let current = sent[0].decode_snapshot().unwrap().current.unwrap();
        assert_eq!(current.completed_reps, vec![10]);
    }

    #[tokio::test]
    async fn remote_action_with_stale_identity_is_dropped() {
        // A stale-identity action must leave the session untouched
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator
            .handle_incoming(&remote_action_bytes(SessionId::new(), &Action::NextSet))
            .await;

        assert!(channel.sent_messages().is_empty());
        // State untouched: the first set is still in progress
        coordinator.advance_set().await;
        let snapshots = snapshots_of(&decode_all(&channel));
        assert_eq!(
            snapshots[0].current.as_ref().unwrap().completed_reps,
            vec![10]
        );
    }

    #[tokio::test]
    async fn remote_action_without_session_is_dropped() {
        let (coordinator, channel, _store, _rx) = setup();

        coordinator
            .handle_incoming(&remote_action_bytes(SessionId::new(), &Action::NextSet))
            .await;

        assert!(channel.sent_messages().is_empty());
        assert!(!coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn malformed_bytes_are_dropped() {
        let (coordinator, channel, _store, _rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator.handle_incoming(&[0xDE, 0xAD, 0xBE, 0xEF]).await;

        assert!(channel.sent_messages().is_empty());
        assert!(coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn peer_snapshot_is_ignored() {
        let (coordinator, channel, _store, _rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        let foreign = LiveSnapshot {
            session_id,
            seq: repsync_types::SnapshotSeq::new(99),
            phase: SessionPhase::Active,
            current: None,
            upcoming_names: vec![],
            started_at: Timestamp::from_millis(0),
        };
        let bytes = Envelope::snapshot(DeviceId::random(), &foreign, false)
            .unwrap()
            .to_bytes()
            .unwrap();
        coordinator.handle_incoming(&bytes).await;

        assert!(channel.sent_messages().is_empty());
        // The authoritative queue still has a current exercise
        coordinator.update_reps(11).await;
        let snapshots = snapshots_of(&decode_all(&channel));
        assert!(snapshots[0].current.is_some());
    }

    #[tokio::test]
    async fn remote_start_adopted_when_idle() {
        let (coordinator, channel, _store, _rx) = setup();
        let seed = SessionSeed {
            session_id: SessionId::new(),
            started_at: Timestamp::from_millis(5_000),
            plans: two_exercise_plans(),
        };

        coordinator
            .handle_incoming(&remote_action_bytes(
                seed.session_id,
                &Action::StartSession(seed.clone()),
            ))
            .await;

        assert_eq!(coordinator.session_id().await, Some(seed.session_id));
        let sent = decode_all(&channel);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].reply);
    }

    #[tokio::test]
    async fn remote_start_while_active_surfaces_conflict() {
        let (coordinator, channel, _store, mut rx) = setup();
        let ours = coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();
        while rx.try_recv().is_ok() {}

        let theirs = SessionId::new();
        let seed = SessionSeed {
            session_id: theirs,
            started_at: Timestamp::from_millis(5_000),
            plans: vec![plan("Other", &[(5, 40.0, 60)])],
        };
        coordinator
            .handle_incoming(&remote_action_bytes(theirs, &Action::StartSession(seed)))
            .await;

        // In-progress work is never overwritten silently
        assert_eq!(coordinator.session_id().await, Some(ours));
        assert!(channel.sent_messages().is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Conflict { ours, theirs }
        );
    }

    #[tokio::test]
    async fn remote_end_persists_and_replies() {
        let (coordinator, channel, store, _rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        coordinator.advance_set().await;
        channel.take_sent();

        coordinator
            .handle_incoming(&remote_action_bytes(session_id, &Action::EndSession))
            .await;

        let sent = decode_all(&channel);
        assert_eq!(sent.len(), 1);
        let snapshot = sent[0].decode_snapshot().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Completed);
        assert_eq!(store.records().len(), 1);
        assert!(!coordinator.is_session_active().await);
    }

    #[tokio::test]
    async fn remote_redundant_update_sends_nothing() {
        let (coordinator, channel, _store, _rx) = setup();
        let session_id = coordinator.start_session(two_exercise_plans()).await.unwrap();
        channel.take_sent();

        coordinator
            .handle_incoming(&remote_action_bytes(
                session_id,
                &Action::UpdateWeight { weight: 60.0 },
            ))
            .await;

        assert!(channel.sent_messages().is_empty());
    }

    // ===========================================
    // Timer Tests
    // ===========================================

    #[tokio::test]
    async fn check_timer_fires_once_per_run() {
        let (coordinator, _channel, _store, mut rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        while rx.try_recv().is_ok() {}

        let long_after = Timestamp::from_millis(Timestamp::now().as_millis() + 600_000);
        coordinator.check_timer(long_after).await;
        coordinator.check_timer(long_after).await;

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::TimerFinished);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn check_timer_quiet_before_expiry() {
        let (coordinator, _channel, _store, mut rx) = setup();
        coordinator.start_session(two_exercise_plans()).await.unwrap();
        while rx.try_recv().is_ok() {}

        coordinator.check_timer(Timestamp::now()).await;

        assert!(rx.try_recv().is_err());
    }
}
