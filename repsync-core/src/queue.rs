//! Exercise queue state machine.
//!
//! The queue models one session's exercises in three partitions:
//! `current` (at most one), `upcoming` (ordered, front = next) and
//! `completed` (ordered, append-only except for the retreat rollback).
//! An item is in exactly one partition at a time.

use std::collections::VecDeque;

use repsync_types::ExercisePlan;

/// Per-exercise set history: two parallel ordered lists, one element
/// appended per finished set.
///
/// The lists move in lock-step; every mutation goes through [`commit`] /
/// [`uncommit`], which is what keeps them equal length at all times.
///
/// [`commit`]: SetEntry::commit
/// [`uncommit`]: SetEntry::uncommit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetEntry {
    completed_reps: Vec<u32>,
    completed_weights: Vec<f64>,
}

impl SetEntry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one finished set.
    pub fn commit(&mut self, reps: u32, weight: f64) {
        self.completed_reps.push(reps);
        self.completed_weights.push(weight);
    }

    /// Pop the most recent set, if any.
    pub fn uncommit(&mut self) -> Option<(u32, f64)> {
        match (self.completed_reps.pop(), self.completed_weights.pop()) {
            (Some(reps), Some(weight)) => Some((reps, weight)),
            _ => None,
        }
    }

    /// Number of committed sets.
    pub fn len(&self) -> usize {
        self.completed_reps.len()
    }

    /// Whether no set has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.completed_reps.is_empty()
    }

    /// Reps of every committed set, in order.
    pub fn reps(&self) -> &[u32] {
        &self.completed_reps
    }

    /// Weights of every committed set, in lock-step with [`reps`].
    ///
    /// [`reps`]: SetEntry::reps
    pub fn weights(&self) -> &[f64] {
        &self.completed_weights
    }
}

/// One exercise in the queue: its plan plus the accumulated set history.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// The plan this item was seeded from.
    pub plan: ExercisePlan,
    /// Committed set history.
    pub entry: SetEntry,
}

impl QueueItem {
    /// Create a fresh item with no committed sets.
    pub fn new(plan: ExercisePlan) -> Self {
        Self {
            plan,
            entry: SetEntry::new(),
        }
    }

    /// Total sets for display: `max(planned, committed + 1)`.
    ///
    /// An exercise can always be advanced past its plan if the person keeps
    /// logging sets; there is no hard ceiling.
    pub fn total_sets(&self) -> u32 {
        self.plan.planned_sets.max(self.entry.len() as u32 + 1)
    }
}

/// The two observable queue states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No active exercise; the session may still be open.
    Idle,
    /// An exercise is in progress.
    Active,
}

/// Ordered collection of one session's exercises.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExerciseQueue {
    current: Option<QueueItem>,
    upcoming: VecDeque<QueueItem>,
    completed: Vec<QueueItem>,
}

impl ExerciseQueue {
    /// Create an empty (idle) queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the queue from ordered plans: the first becomes `current`, the
    /// rest become `upcoming`.
    pub fn seed(plans: Vec<ExercisePlan>) -> Self {
        let mut items: VecDeque<QueueItem> = plans.into_iter().map(QueueItem::new).collect();
        let current = items.pop_front();
        Self {
            current,
            upcoming: items,
            completed: Vec::new(),
        }
    }

    /// The observable state.
    pub fn state(&self) -> QueueState {
        if self.current.is_some() {
            QueueState::Active
        } else {
            QueueState::Idle
        }
    }

    /// The active item, if any.
    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    /// Mutable access to the active item, if any.
    pub fn current_mut(&mut self) -> Option<&mut QueueItem> {
        self.current.as_mut()
    }

    /// Names of the upcoming exercises, front first.
    pub fn upcoming_names(&self) -> Vec<String> {
        self.upcoming.iter().map(|item| item.plan.name.clone()).collect()
    }

    /// Number of upcoming exercises.
    pub fn upcoming_len(&self) -> usize {
        self.upcoming.len()
    }

    /// The completed items, oldest first.
    pub fn completed(&self) -> &[QueueItem] {
        &self.completed
    }

    /// Move `current` into `completed` and promote the upcoming front.
    ///
    /// When `upcoming` is empty the queue becomes [`QueueState::Idle`]; the
    /// session itself stays open until explicitly ended. Returns the new
    /// state.
    pub fn advance_exercise(&mut self) -> QueueState {
        if let Some(done) = self.current.take() {
            self.completed.push(done);
        }
        self.current = self.upcoming.pop_front();
        self.state()
    }

    /// Push `current` back to the front of `upcoming` and pop the last
    /// completed item back into `current`.
    ///
    /// No-op when nothing has been completed yet. Returns the new state.
    pub fn retreat_exercise(&mut self) -> QueueState {
        if let Some(previous) = self.completed.pop() {
            if let Some(active) = self.current.take() {
                self.upcoming.push_front(active);
            }
            self.current = Some(previous);
        }
        self.state()
    }

    /// Fold the active item into `completed` if it holds any committed
    /// sets; an untouched current item is simply dropped.
    ///
    /// Used when the session ends while an exercise is still in progress.
    pub fn finalize_current(&mut self) {
        if let Some(active) = self.current.take() {
            if !active.entry.is_empty() {
                self.completed.push(active);
            }
        }
    }

    /// Consume the queue, yielding the completed items for persistence.
    pub fn into_completed(self) -> Vec<QueueItem> {
        self.completed
    }
}
