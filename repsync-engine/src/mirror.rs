//! The non-authoritative session projection.
//!
//! The mirror runs on the secondary (wrist-worn) device. It holds a
//! flattened copy of what the display needs, forwards every user intent
//! upstream as an action, and replaces its view wholesale whenever a
//! snapshot arrives. It never computes queue transitions itself; the only
//! local mutations are cosmetic (a bumped set counter, a zeroed countdown
//! display) and are overwritten unconditionally by the next snapshot.

use repsync_core::RestTimer;
use repsync_types::{
    Action, DeviceId, Envelope, ExercisePlan, LiveSnapshot, MessageType, SessionId, SessionPhase,
    SessionSeed, SnapshotSeq, Timestamp,
};
use tokio::sync::{mpsc, Mutex};

use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::events::{event_channel, EventSender, SessionEvent};
use crate::guard::ReentrancyGuard;

/// State behind the mirror's single mutation lock.
#[derive(Debug)]
struct MirrorState {
    /// Identity of the session the view describes. Kept after the session
    /// closes so late duplicates still hit the sequence check.
    session_id: Option<SessionId>,
    /// Highest snapshot sequence applied for `session_id`.
    last_seq: SnapshotSeq,
    /// The mirrored display state; `None` until the first snapshot lands.
    view: Option<LiveSnapshot>,
    /// Start anchor of the timer run that already fired its local cue.
    timer_fired_anchor: Option<Timestamp>,
}

impl MirrorState {
    /// The session actions should be tagged with, if intents are currently
    /// meaningful (no view yet, or the session is still open).
    fn send_target(&self) -> Option<SessionId> {
        let session_id = self.session_id?;
        match &self.view {
            Some(view) if view.phase != SessionPhase::Active => None,
            _ => Some(session_id),
        }
    }
}

/// The non-authoritative device-side projection of session state.
pub struct Mirror<C: Channel> {
    config: EngineConfig,
    device_id: DeviceId,
    channel: C,
    state: Mutex<MirrorState>,
    guard: ReentrancyGuard,
    events: EventSender,
}

impl<C: Channel> Mirror<C> {
    /// Create a mirror and the event receiver the embedder subscribes to.
    pub fn new(config: EngineConfig, channel: C) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = event_channel();
        let mirror = Self {
            config,
            device_id: DeviceId::random(),
            channel,
            state: Mutex::new(MirrorState {
                session_id: None,
                last_seq: SnapshotSeq::zero(),
                view: None,
                timer_fired_anchor: None,
            }),
            guard: ReentrancyGuard::new(),
            events,
        };
        (mirror, rx)
    }

    /// This device's identity.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// The mirrored display state, if any snapshot has been applied.
    pub async fn view(&self) -> Option<LiveSnapshot> {
        self.state.lock().await.view.clone()
    }

    /// The session identity the mirror currently follows.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session_id
    }

    /// Whether the peer is currently believed reachable (advisory, for UI
    /// affordances only; intents are sent regardless).
    pub fn is_peer_reachable(&self) -> bool {
        self.channel.is_peer_reachable()
    }

    /// Get a reference to the underlying channel (for testing).
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Ask the coordinator to open a new session.
    ///
    /// The mirror allocates the identity and sends the seed upstream; the
    /// authoritative state arrives with the responding snapshot.
    pub async fn start_session(&self, plans: Vec<ExercisePlan>) -> SessionId {
        let seed = SessionSeed {
            session_id: SessionId::new(),
            started_at: Timestamp::now(),
            plans,
        };
        let session_id = seed.session_id;
        {
            let mut state = self.state.lock().await;
            state.session_id = Some(session_id);
            state.last_seq = SnapshotSeq::zero();
            state.view = None;
            state.timer_fired_anchor = None;
        }
        tracing::info!(%session_id, device = %self.config.device_name, "requesting session start");
        self.send_action(session_id, &Action::StartSession(seed))
            .await;
        session_id
    }

    /// Forward "next set", optimistically bumping the displayed counter and
    /// zeroing the countdown display.
    pub async fn next_set(&self) {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        let Some(session_id) = state.send_target() else {
            return;
        };
        let mut updated = None;
        if let Some(current) = state.view.as_mut().and_then(|v| v.current.as_mut()) {
            current.set_index += 1;
            current.total_sets = current.total_sets.max(current.set_index);
            current.rest_started_at = Some(now);
            updated = state.view.clone();
        }
        drop(state);

        if let Some(view) = updated {
            self.events.emit(SessionEvent::SnapshotChanged(view));
        }
        self.send_action(session_id, &Action::NextSet).await;
    }

    /// Forward "previous set", optimistically stepping the displayed
    /// counter back.
    pub async fn previous_set(&self) {
        let mut state = self.state.lock().await;
        let Some(session_id) = state.send_target() else {
            return;
        };
        let mut updated = None;
        if let Some(current) = state.view.as_mut().and_then(|v| v.current.as_mut()) {
            if current.set_index > 1 {
                current.set_index -= 1;
                updated = state.view.clone();
            }
        }
        drop(state);

        if let Some(view) = updated {
            self.events.emit(SessionEvent::SnapshotChanged(view));
        }
        self.send_action(session_id, &Action::PreviousSet).await;
    }

    /// Forward "next exercise". The mirror cannot know the next exercise's
    /// contents, so the display waits for the snapshot.
    pub async fn next_exercise(&self) {
        let Some(session_id) = self.state.lock().await.send_target() else {
            return;
        };
        self.send_action(session_id, &Action::NextExercise).await;
    }

    /// Forward "previous exercise".
    pub async fn previous_exercise(&self) {
        let Some(session_id) = self.state.lock().await.send_target() else {
            return;
        };
        self.send_action(session_id, &Action::PreviousExercise).await;
    }

    /// Forward a rep-target change, optimistically updating the display.
    pub async fn update_reps(&self, reps: u32) {
        let session_id = self
            .mutate_current(|current| current.reps = reps)
            .await;
        if let Some(session_id) = session_id {
            self.send_action(session_id, &Action::UpdateReps { reps })
                .await;
        }
    }

    /// Forward a weight change, optimistically updating the display.
    pub async fn update_weight(&self, weight: f64) {
        let session_id = self
            .mutate_current(|current| current.weight = weight)
            .await;
        if let Some(session_id) = session_id {
            self.send_action(session_id, &Action::UpdateWeight { weight })
                .await;
        }
    }

    /// Forward a rest-duration change, optimistically updating the display.
    pub async fn update_rest(&self, rest_secs: u32) {
        let session_id = self
            .mutate_current(|current| current.rest_duration_secs = rest_secs)
            .await;
        if let Some(session_id) = session_id {
            self.send_action(session_id, &Action::UpdateRest { rest_secs })
                .await;
        }
    }

    /// Ask the coordinator to end the session; the display flips to
    /// completed optimistically.
    pub async fn end_session(&self) {
        let Some(session_id) = self.set_phase(SessionPhase::Completed).await else {
            return;
        };
        self.send_action(session_id, &Action::EndSession).await;
    }

    /// Ask the coordinator to cancel the session; the display flips to
    /// cancelled optimistically.
    pub async fn cancel_session(&self) {
        let Some(session_id) = self.set_phase(SessionPhase::Cancelled).await else {
            return;
        };
        self.send_action(session_id, &Action::CancelSession).await;
    }

    /// Feed bytes received from the coordinator into the mirror.
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
            Ok(MessageType::Snapshot) => match envelope.decode_snapshot() {
                Ok(snapshot) => self.apply_snapshot(snapshot).await,
                Err(err) => tracing::warn!("dropping undecodable snapshot: {err}"),
            },
            Ok(MessageType::Action) => match envelope.decode_action() {
                Ok(action) => self.apply_peer_action(action, envelope.session_id).await,
                Err(err) => tracing::warn!("dropping undecodable action: {err}"),
            },
            Err(err) => tracing::warn!("dropping message with unknown type: {err}"),
        }
    }

    /// Replace the mirrored state wholesale with an incoming snapshot.
    ///
    /// Wholesale replacement (never a field-by-field merge) is what makes
    /// application idempotent and rules out partial-update inconsistency.
    /// Snapshots that are not newer than the last applied sequence for the
    /// same session are discarded.
    pub async fn apply_snapshot(&self, snapshot: LiveSnapshot) {
        let mut state = self.state.lock().await;
        let _token = self.guard.enter();

        match state.session_id {
            Some(id) if id == snapshot.session_id => {
                if snapshot.seq <= state.last_seq {
                    tracing::debug!(seq = %snapshot.seq, last = %state.last_seq, "discarding stale snapshot");
                    return;
                }
            }
            Some(id) => {
                // A different identity means a new session superseded the
                // old one; the mirror is never authoritative, so it defers.
                tracing::info!(old = %id, new = %snapshot.session_id, "adopting superseding session");
                state.timer_fired_anchor = None;
            }
            None => {
                tracing::debug!(session_id = %snapshot.session_id, "adopting session from snapshot");
            }
        }

        state.session_id = Some(snapshot.session_id);
        state.last_seq = snapshot.seq;
        state.view = Some(snapshot.clone());
        drop(state);

        self.events.emit(SessionEvent::SnapshotChanged(snapshot));
    }

    /// Signal that the local rest countdown reached zero, at most once per
    /// timer run. Driven by the embedder's display tick.
    pub async fn check_timer(&self, now: Timestamp) {
        let mut state = self.state.lock().await;
        let anchor = match state.view.as_ref().and_then(|v| v.current.as_ref()) {
            Some(current) if current.rest_duration_secs > 0 => {
                let Some(started_at) = current.rest_started_at else {
                    return;
                };
                let timer = RestTimer::from_anchors(current.rest_duration_secs, started_at);
                if !timer.is_finished(now) {
                    return;
                }
                started_at
            }
            _ => return,
        };
        if state.timer_fired_anchor == Some(anchor) {
            return;
        }
        state.timer_fired_anchor = Some(anchor);
        drop(state);
        self.events.emit(SessionEvent::TimerFinished);
    }

    /// Apply an action sent by the peer. The mirror only honors session
    /// adoption and the timer display reset; everything else is the
    /// coordinator's job.
    async fn apply_peer_action(&self, action: Action, identity: SessionId) {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;
        let _token = self.guard.enter();

        match action {
            Action::StartSession(seed) => {
                if state.session_id == Some(seed.session_id) {
                    tracing::debug!("duplicate session start; already following");
                    return;
                }
                // No identity held, or a new session superseding the old
                // one: the mirror always defers.
                tracing::info!(session_id = %seed.session_id, "adopting session started by peer");
                state.session_id = Some(seed.session_id);
                state.last_seq = SnapshotSeq::zero();
                state.view = None;
                state.timer_fired_anchor = None;
            }
            Action::TimerStarted => {
                if state.session_id != Some(identity) {
                    tracing::debug!(%identity, "dropping action for stale session");
                    return;
                }
                let mut updated = None;
                if let Some(current) = state.view.as_mut().and_then(|v| v.current.as_mut()) {
                    current.rest_started_at = Some(now);
                    updated = state.view.clone();
                }
                state.timer_fired_anchor = None;
                drop(state);
                if let Some(view) = updated {
                    self.events.emit(SessionEvent::SnapshotChanged(view));
                }
            }
            other => {
                tracing::debug!(?other, "mirror is not authoritative; ignoring action");
            }
        }
    }

    /// Optimistically mutate the displayed current exercise; returns the
    /// send target when intents are currently meaningful.
    async fn mutate_current<F>(&self, mutate: F) -> Option<SessionId>
    where
        F: FnOnce(&mut repsync_types::SnapshotExercise),
    {
        let mut state = self.state.lock().await;
        let session_id = state.send_target()?;
        let mut updated = None;
        if let Some(current) = state.view.as_mut().and_then(|v| v.current.as_mut()) {
            mutate(current);
            updated = state.view.clone();
        }
        drop(state);

        if let Some(view) = updated {
            self.events.emit(SessionEvent::SnapshotChanged(view));
        }
        Some(session_id)
    }

    /// Optimistically flip the displayed phase; returns the send target.
    async fn set_phase(&self, phase: SessionPhase) -> Option<SessionId> {
        let mut state = self.state.lock().await;
        let session_id = state.send_target()?;
        let mut updated = None;
        if let Some(view) = state.view.as_mut() {
            view.phase = phase;
            updated = Some(view.clone());
        }
        drop(state);

        if let Some(view) = updated {
            self.events.emit(SessionEvent::SnapshotChanged(view));
        }
        Some(session_id)
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
            // Fire-and-forget: the next snapshot re-syncs this device
            tracing::warn!("action send failed: {err}");
        }
    }
}
