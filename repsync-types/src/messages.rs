//! Protocol messages for repsync.
//!
//! Two message kinds cross the wire, both wrapped in an [`Envelope`]:
//! [`Action`] (small, intent-only) and [`LiveSnapshot`] (full state,
//! last-write-wins at the receiver).
//!
//! [`Envelope`]: crate::Envelope

use serde::{Deserialize, Serialize};

use crate::{SessionId, SnapshotSeq, Timestamp, WireError};

/// The per-set template row of an exercise plan.
///
/// Supplied by the plan source from the exercise's history; used to derive
/// the target reps/weight/rest for each upcoming set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTemplate {
    /// Target repetitions for this set.
    pub reps: u32,
    /// Target weight for this set.
    pub weight: f64,
    /// Rest duration after this set, in seconds (0 = no rest timer).
    pub rest_secs: u32,
}

/// One planned exercise within a session seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExercisePlan {
    /// Display name of the exercise.
    pub name: String,
    /// Number of sets the plan calls for.
    pub planned_sets: u32,
    /// Per-set template rows, indexed by set number (0-based).
    ///
    /// May be shorter than `planned_sets`; sets past the template fall back
    /// to the last entered values.
    pub template: Vec<SetTemplate>,
    /// Snap target weight to the template row when advancing sets.
    pub auto_adjust_weights: bool,
}

impl ExercisePlan {
    /// The template row for a 0-based set index, if the plan has one.
    pub fn template_for_set(&self, set_index: usize) -> Option<&SetTemplate> {
        self.template.get(set_index)
    }
}

/// Payload of [`Action::StartSession`]: everything the peer needs to open
/// the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSeed {
    /// Identity allocated by the starting device.
    pub session_id: SessionId,
    /// Wall-clock start of the workout.
    pub started_at: Timestamp,
    /// Ordered exercise plans; the first becomes the current exercise.
    pub plans: Vec<ExercisePlan>,
}

/// An intent-only message describing a requested session transition.
///
/// Actions never carry resulting values; results arrive via the
/// [`LiveSnapshot`] that follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Open a new session with the given seed.
    StartSession(SessionSeed),
    /// Commit the in-progress set and move to the next one.
    NextSet,
    /// Un-commit the most recent set.
    PreviousSet,
    /// Finish the current exercise and promote the next one.
    NextExercise,
    /// Return to the previously completed exercise.
    PreviousExercise,
    /// Change the editable rep target for the in-progress set.
    UpdateReps {
        /// The new rep target.
        reps: u32,
    },
    /// Change the editable weight for the in-progress set.
    UpdateWeight {
        /// The new weight.
        weight: f64,
    },
    /// Change the rest duration for the in-progress set.
    UpdateRest {
        /// The new rest duration in seconds.
        rest_secs: u32,
    },
    /// The sender restarted its rest timer; reset the elapsed display.
    ///
    /// Decoupled from the timer anchors themselves (which travel in the
    /// snapshot) so a lagging peer can zero its display immediately.
    TimerStarted,
    /// Close the session and persist it.
    EndSession,
    /// Close the session and discard it.
    CancelSession,
}

impl Action {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// Lifecycle phase carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// The session is open.
    Active,
    /// The session was ended and persisted.
    Completed,
    /// The session was cancelled and discarded.
    Cancelled,
}

/// The current-exercise block of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotExercise {
    /// Display name of the exercise.
    pub name: String,
    /// 1-based index of the in-progress set.
    pub set_index: u32,
    /// Total sets: max(planned, committed + 1).
    pub total_sets: u32,
    /// Editable rep target for the in-progress set.
    pub reps: u32,
    /// Editable weight for the in-progress set.
    pub weight: f64,
    /// Rest duration anchor, in seconds.
    pub rest_duration_secs: u32,
    /// Rest start anchor, present while a countdown is running; remaining
    /// time is recomputed locally against the receiver's own clock.
    pub rest_started_at: Option<Timestamp>,
    /// Reps of every committed set, in order.
    pub completed_reps: Vec<u32>,
    /// Weights of every committed set, in lock-step with `completed_reps`.
    pub completed_weights: Vec<f64>,
}

/// The full-state broadcast unit.
///
/// Snapshots are idempotent: applying the same snapshot twice produces the
/// same mirrored state. Upcoming exercises travel as names only; the mirror
/// never computes queue transitions, so it never needs the full objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    /// The session this snapshot describes.
    pub session_id: SessionId,
    /// Per-session monotonic sequence number; receivers discard stale seqs.
    pub seq: SnapshotSeq,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// The active exercise, or `None` when the queue is idle.
    pub current: Option<SnapshotExercise>,
    /// Names of the upcoming exercises, front first.
    pub upcoming_names: Vec<String>,
    /// Wall-clock start of the workout.
    pub started_at: Timestamp,
}

impl LiveSnapshot {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bench_press() -> ExercisePlan {
        ExercisePlan {
            name: "Bench Press".into(),
            planned_sets: 3,
            template: vec![
                SetTemplate { reps: 10, weight: 60.0, rest_secs: 90 },
                SetTemplate { reps: 8, weight: 70.0, rest_secs: 120 },
                SetTemplate { reps: 6, weight: 75.0, rest_secs: 120 },
            ],
            auto_adjust_weights: true,
        }
    }

    #[test]
    fn plan_template_lookup() {
        let plan = bench_press();
        assert_eq!(plan.template_for_set(1).unwrap().weight, 70.0);
        assert!(plan.template_for_set(3).is_none());
    }

    #[test]
    fn action_unit_variant_roundtrip() {
        let action = Action::NextSet;
        let bytes = action.to_bytes().unwrap();
        let restored = Action::from_bytes(&bytes).unwrap();
        assert_eq!(action, restored);
    }

    #[test]
    fn action_update_weight_roundtrip() {
        let action = Action::UpdateWeight { weight: 82.5 };
        let bytes = action.to_bytes().unwrap();
        let restored = Action::from_bytes(&bytes).unwrap();
        assert_eq!(action, restored);
    }

    #[test]
    fn action_start_session_roundtrip() {
        let action = Action::StartSession(SessionSeed {
            session_id: SessionId::new(),
            started_at: Timestamp::from_millis(1_705_000_000_000),
            plans: vec![bench_press()],
        });
        let bytes = action.to_bytes().unwrap();
        let restored = Action::from_bytes(&bytes).unwrap();
        assert_eq!(action, restored);
    }

    #[test]
    fn action_garbage_bytes_fail() {
        assert!(Action::from_bytes(&[0xFF, 0x00, 0x13]).is_err());
    }

    #[test]
    fn snapshot_roundtrip_with_current() {
        let snapshot = LiveSnapshot {
            session_id: SessionId::new(),
            seq: SnapshotSeq::new(7),
            phase: SessionPhase::Active,
            current: Some(SnapshotExercise {
                name: "Squat".into(),
                set_index: 2,
                total_sets: 5,
                reps: 5,
                weight: 100.0,
                rest_duration_secs: 180,
                rest_started_at: Some(Timestamp::from_millis(1_705_000_000_000)),
                completed_reps: vec![5],
                completed_weights: vec![100.0],
            }),
            upcoming_names: vec!["Deadlift".into(), "Row".into()],
            started_at: Timestamp::from_millis(1_704_999_000_000),
        };

        let bytes = snapshot.to_bytes().unwrap();
        let restored = LiveSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(snapshot, restored);
    }

    #[test]
    fn snapshot_roundtrip_idle() {
        let snapshot = LiveSnapshot {
            session_id: SessionId::new(),
            seq: SnapshotSeq::new(12),
            phase: SessionPhase::Active,
            current: None,
            upcoming_names: vec![],
            started_at: Timestamp::from_millis(1_705_000_000_000),
        };

        let bytes = snapshot.to_bytes().unwrap();
        let restored = LiveSnapshot::from_bytes(&bytes).unwrap();
        assert!(restored.current.is_none());
        assert_eq!(restored.seq, SnapshotSeq::new(12));
    }

    #[test]
    fn snapshot_phase_roundtrip() {
        for phase in [
            SessionPhase::Active,
            SessionPhase::Completed,
            SessionPhase::Cancelled,
        ] {
            let snapshot = LiveSnapshot {
                session_id: SessionId::new(),
                seq: SnapshotSeq::zero(),
                phase,
                current: None,
                upcoming_names: vec![],
                started_at: Timestamp::from_millis(0),
            };
            let restored = LiveSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
            assert_eq!(restored.phase, phase);
        }
    }

    #[test]
    fn snapshot_lockstep_lists_survive_roundtrip() {
        let snapshot = LiveSnapshot {
            session_id: SessionId::new(),
            seq: SnapshotSeq::new(3),
            phase: SessionPhase::Active,
            current: Some(SnapshotExercise {
                name: "Overhead Press".into(),
                set_index: 4,
                total_sets: 4,
                reps: 8,
                weight: 40.0,
                rest_duration_secs: 90,
                rest_started_at: Some(Timestamp::from_millis(1_705_000_000_000)),
                completed_reps: vec![10, 9, 8],
                completed_weights: vec![40.0, 40.0, 42.5],
            }),
            upcoming_names: vec![],
            started_at: Timestamp::from_millis(1_704_999_000_000),
        };

        let restored = LiveSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        let current = restored.current.unwrap();
        assert_eq!(current.completed_reps.len(), current.completed_weights.len());
        assert_eq!(current.completed_reps, vec![10, 9, 8]);
    }
}
