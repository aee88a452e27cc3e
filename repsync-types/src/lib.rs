//! # repsync-types
//!
//! Wire format types for the repsync workout session protocol.
//!
//! This crate provides the foundational types used across all repsync crates:
//! - [`SessionId`], [`DeviceId`], [`SnapshotSeq`], [`Timestamp`] - Identity and ordering types
//! - [`Envelope`] - Message wrapper with routing metadata
//! - [`Action`], [`LiveSnapshot`] - The two protocol message kinds
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{Envelope, MessageType, PROTOCOL_VERSION};
pub use error::WireError;
pub use ids::{DeviceId, SessionId, SnapshotSeq, Timestamp};
pub use messages::{
    Action, ExercisePlan, LiveSnapshot, SessionPhase, SessionSeed, SetTemplate, SnapshotExercise,
};
