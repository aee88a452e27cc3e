//! The authoritative in-memory session.
//!
//! [`ActiveSession`] is the aggregate the coordinator owns: the exercise
//! queue, the editable targets for the in-progress set, the rest timer
//! anchors and the snapshot sequence counter. Every method here is a pure
//! state transition; the engine crate performs the I/O around them.

use repsync_types::{
    LiveSnapshot, SessionId, SessionPhase, SessionSeed, SnapshotExercise, SnapshotSeq, Timestamp,
};

use crate::queue::{ExerciseQueue, QueueState};
use crate::timer::RestTimer;

/// One finished exercise, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseRecord {
    /// Display name of the exercise.
    pub name: String,
    /// Reps of every committed set, in order.
    pub completed_reps: Vec<u32>,
    /// Weights of every committed set, in lock-step with `completed_reps`.
    pub completed_weights: Vec<f64>,
}

/// A finalized session handed to the persistence collaborator on end.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Identity of the finished session.
    pub session_id: SessionId,
    /// Wall-clock start of the workout.
    pub started_at: Timestamp,
    /// Wall-clock completion instant.
    pub completed_at: Timestamp,
    /// Every exercise that holds at least one committed set.
    pub exercises: Vec<ExerciseRecord>,
}

/// The authoritative session state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    id: SessionId,
    queue: ExerciseQueue,
    reps: u32,
    weight: f64,
    rest_secs: u32,
    timer: Option<RestTimer>,
    started_at: Timestamp,
    seq: SnapshotSeq,
}

impl ActiveSession {
    /// Open a session from a seed.
    ///
    /// The first plan becomes the current exercise; its first template row
    /// seeds the editable targets, and the rest timer starts when that row
    /// carries a nonzero rest value.
    pub fn start(seed: SessionSeed, now: Timestamp) -> Self {
        let mut session = Self {
            id: seed.session_id,
            queue: ExerciseQueue::seed(seed.plans),
            reps: 0,
            weight: 0.0,
            rest_secs: 0,
            timer: None,
            started_at: seed.started_at,
            seq: SnapshotSeq::zero(),
        };
        session.load_targets();
        session.restart_timer(now);
        session
    }

    /// The session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The queue state (idle or active).
    pub fn state(&self) -> QueueState {
        self.queue.state()
    }

    /// The exercise queue.
    pub fn queue(&self) -> &ExerciseQueue {
        &self.queue
    }

    /// The running rest timer, if any.
    pub fn timer(&self) -> Option<&RestTimer> {
        self.timer.as_ref()
    }

    /// Wall-clock start of the workout.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Editable rep target for the in-progress set.
    pub fn reps(&self) -> u32 {
        self.reps
    }

    /// Editable weight for the in-progress set.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Editable rest duration for the in-progress set, in seconds.
    pub fn rest_secs(&self) -> u32 {
        self.rest_secs
    }

    /// Commit the editable reps/weight as a finished set and derive the
    /// next set's targets from the plan template.
    ///
    /// Weight policy: when the plan has `auto_adjust_weights` set and a
    /// template row exists for the next set, the target weight snaps to
    /// that row; otherwise the last entered weight is preserved. Reps and
    /// rest always follow the template when a row exists. Restarts the rest
    /// timer. No-op when the queue is idle.
    pub fn advance_set(&mut self, now: Timestamp) {
        let (reps, weight) = (self.reps, self.weight);
        let Some(current) = self.queue.current_mut() else {
            return;
        };
        current.entry.commit(reps, weight);

        let next_index = current.entry.len();
        if let Some(row) = current.plan.template_for_set(next_index) {
            self.reps = row.reps;
            self.rest_secs = row.rest_secs;
            if current.plan.auto_adjust_weights {
                self.weight = row.weight;
            }
        }
        self.restart_timer(now);
    }

    /// Pop the last committed set back into the editable fields and
    /// re-derive the rest target for the now-current set index.
    ///
    /// Restarts the rest timer. No-op when there is nothing to pop (the
    /// caller still broadcasts, so both devices settle on the same state).
    pub fn retreat_set(&mut self, now: Timestamp) {
        let Some(current) = self.queue.current_mut() else {
            return;
        };
        let Some((reps, weight)) = current.entry.uncommit() else {
            return;
        };
        self.reps = reps;
        self.weight = weight;

        let set_index = current.entry.len();
        if let Some(row) = current.plan.template_for_set(set_index) {
            self.rest_secs = row.rest_secs;
        }
        self.restart_timer(now);
    }

    /// Finish the current exercise and promote the upcoming front.
    ///
    /// The incoming exercise's timer starts when its first template row has
    /// a nonzero rest value. When `upcoming` is empty the queue goes idle
    /// and the timer is cleared; the session stays open.
    pub fn advance_exercise(&mut self, now: Timestamp) {
        match self.queue.advance_exercise() {
            QueueState::Active => {
                self.load_targets();
                self.restart_timer(now);
            }
            QueueState::Idle => {
                self.timer = None;
            }
        }
    }

    /// Return to the previously completed exercise.
    ///
    /// Reloads the editable targets for that exercise's in-progress set;
    /// the timer is left alone. No-op when nothing has been completed.
    pub fn retreat_exercise(&mut self) {
        if self.queue.retreat_exercise() == QueueState::Active {
            self.load_targets();
        }
    }

    /// Change the editable rep target. Returns whether the value changed.
    pub fn update_reps(&mut self, reps: u32) -> bool {
        if self.reps == reps {
            return false;
        }
        self.reps = reps;
        true
    }

    /// Change the editable weight. Returns whether the value changed.
    pub fn update_weight(&mut self, weight: f64) -> bool {
        if self.weight.to_bits() == weight.to_bits() {
            return false;
        }
        self.weight = weight;
        true
    }

    /// Change the rest duration. Returns whether the value changed.
    ///
    /// A running countdown keeps its start anchor and adopts the new
    /// duration, so shortening the rest ends the countdown sooner.
    pub fn update_rest(&mut self, rest_secs: u32) -> bool {
        if self.rest_secs == rest_secs {
            return false;
        }
        self.rest_secs = rest_secs;
        if let Some(timer) = self.timer {
            self.timer = Some(RestTimer::from_anchors(rest_secs, timer.started_at()));
        }
        true
    }

    /// Restart the rest timer from the editable rest duration at `now`.
    ///
    /// A zero duration clears the timer.
    pub fn restart_timer(&mut self, now: Timestamp) {
        self.timer = if self.rest_secs > 0 {
            Some(RestTimer::start(self.rest_secs, now))
        } else {
            None
        };
    }

    /// Fold an in-progress exercise holding committed sets into the
    /// completed partition; an untouched one is dropped.
    pub fn finalize(&mut self) {
        self.queue.finalize_current();
        self.timer = None;
    }

    /// Build the full-state broadcast for the given phase, bumping the
    /// per-session sequence number.
    pub fn snapshot(&mut self, phase: SessionPhase) -> LiveSnapshot {
        self.seq = self.seq.next();
        let current = self.queue.current().map(|item| SnapshotExercise {
            name: item.plan.name.clone(),
            set_index: item.entry.len() as u32 + 1,
            total_sets: item.total_sets(),
            reps: self.reps,
            weight: self.weight,
            rest_duration_secs: self.rest_secs,
            rest_started_at: self.timer.map(|t| t.started_at()),
            completed_reps: item.entry.reps().to_vec(),
            completed_weights: item.entry.weights().to_vec(),
        });
        LiveSnapshot {
            session_id: self.id,
            seq: self.seq,
            phase,
            current,
            upcoming_names: self.queue.upcoming_names(),
            started_at: self.started_at,
        }
    }

    /// Consume the session into a persistence record.
    pub fn into_record(self, completed_at: Timestamp) -> SessionRecord {
        let exercises = self
            .queue
            .into_completed()
            .into_iter()
            .map(|item| ExerciseRecord {
                name: item.plan.name,
                completed_reps: item.entry.reps().to_vec(),
                completed_weights: item.entry.weights().to_vec(),
            })
            .collect();
        SessionRecord {
            session_id: self.id,
            started_at: self.started_at,
            completed_at,
            exercises,
        }
    }

    fn load_targets(&mut self) {
        let Some(current) = self.queue.current() else {
            return;
        };
        let set_index = current.entry.len();
        if let Some(row) = current.plan.template_for_set(set_index) {
            self.reps = row.reps;
            self.weight = row.weight;
            self.rest_secs = row.rest_secs;
        }
    }
}
