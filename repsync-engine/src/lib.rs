//! # repsync-engine
//!
//! Device-side session synchronization runtime for repsync.
//!
//! Two devices keep one mutable workout session in agreement:
//!
//! ```text
//! primary device                         secondary device
//! ┌──────────────┐   Action (intent)    ┌──────────────┐
//! │ Coordinator  │ ◄─────────────────── │    Mirror    │
//! │ (authority)  │ ───────────────────► │ (projection) │
//! └──────────────┘  Snapshot (state)    └──────────────┘
//! ```
//!
//! The [`Coordinator`] owns the authoritative state (from `repsync-core`)
//! and is the only component that decides transitions. The [`Mirror`]
//! forwards user intents upstream and applies snapshots wholesale. Both
//! sides hold a reentrancy guard so an inbound update can never re-trigger
//! an outbound intent, and snapshots carry a per-session sequence number so
//! out-of-order delivery is discarded rather than applied.
//!
//! The byte transport is pluggable via the [`Channel`] trait
//! ([`MockChannel`] ships for tests); persistence hangs off the
//! [`SessionStore`] trait; the embedding application consumes
//! [`SessionEvent`]s to drive its rendering layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod channel;
mod config;
mod coordinator;
mod events;
mod guard;
mod mirror;
mod store;

pub use channel::{Channel, ChannelError, MockChannel};
pub use config::EngineConfig;
pub use coordinator::{Coordinator, SessionError};
pub use events::SessionEvent;
pub use guard::{GuardToken, ReentrancyGuard};
pub use mirror::Mirror;
pub use store::{MemoryStore, NullStore, SessionStore, StoreError};
