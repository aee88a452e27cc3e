//! Error types for the repsync wire format.

use thiserror::Error;

/// Errors that can occur encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload does not match the envelope's declared message type
    #[error("payload type mismatch: expected {expected}, envelope says {actual}")]
    PayloadTypeMismatch {
        /// The message type the caller asked to decode.
        expected: &'static str,
        /// The discriminator the envelope actually carries.
        actual: u8,
    },
}
