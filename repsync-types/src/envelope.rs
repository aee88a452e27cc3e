//! Envelope - the wire format wrapper for all session messages.

use serde::{Deserialize, Serialize};

use crate::{Action, DeviceId, LiveSnapshot, SessionId, Timestamp, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// An intent-only action
    Action = 1,
    /// A full-state snapshot
    Snapshot = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Action),
            2 => Ok(MessageType::Snapshot),
            _ => Err(WireError::InvalidMessageType(value)),
        }
    }
}

/// The envelope wraps both message kinds with routing metadata.
///
/// The session id travels here rather than inside each payload so a receiver
/// can reject stale-identity traffic before decoding the payload at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Message type discriminator
    pub msg_type: u8,
    /// Sender's device ID
    pub sender: DeviceId,
    /// The session this message belongs to
    pub session_id: SessionId,
    /// Snapshot sent in response to a remote action, not as a new intent
    pub reply: bool,
    /// Unix timestamp (milliseconds) - informational only, not trusted
    pub timestamp: Timestamp,
    /// MessagePack-encoded inner message
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap an action for sending.
    pub fn action(sender: DeviceId, session_id: SessionId, action: &Action) -> Result<Self, WireError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Action as u8,
            sender,
            session_id,
            reply: false,
            timestamp: Timestamp::now(),
            payload: action.to_bytes()?,
        })
    }

    /// Wrap a snapshot for sending.
    ///
    /// `reply` marks snapshots emitted while applying a remote action, so
    /// they read as part of the same causal chain rather than a new intent.
    pub fn snapshot(sender: DeviceId, snapshot: &LiveSnapshot, reply: bool) -> Result<Self, WireError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Snapshot as u8,
            sender,
            session_id: snapshot.session_id,
            reply,
            timestamp: Timestamp::now(),
            payload: snapshot.to_bytes()?,
        })
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes, rejecting unknown versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let envelope: Self = rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    /// Get the message type as an enum.
    pub fn message_type(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.msg_type)
    }

    /// Decode the payload as an [`Action`].
    pub fn decode_action(&self) -> Result<Action, WireError> {
        if self.message_type()? != MessageType::Action {
            return Err(WireError::PayloadTypeMismatch {
                expected: "action",
                actual: self.msg_type,
            });
        }
        Action::from_bytes(&self.payload)
    }

    /// Decode the payload as a [`LiveSnapshot`].
    pub fn decode_snapshot(&self) -> Result<LiveSnapshot, WireError> {
        if self.message_type()? != MessageType::Snapshot {
            return Err(WireError::PayloadTypeMismatch {
                expected: "snapshot",
                actual: self.msg_type,
            });
        }
        LiveSnapshot::from_bytes(&self.payload)
    }
}
