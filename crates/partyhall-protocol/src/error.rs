//! Wire-level failures.
//!
//! A `ProtocolError` means the bytes were wrong: a malformed JSON control
//! message, a corrupt tick frame, or a value the wire format cannot carry.
//! It concerns one message only and the connection survives it.

use rkyv::rancor;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("could not serialize control message: {0}")]
    Encode(serde_json::Error),

    /// Malformed JSON, a missing or unknown `"type"` tag, or fields of the
    /// wrong shape.
    #[error("could not parse control message: {0}")]
    Decode(serde_json::Error),

    #[error("could not archive tick frame: {0}")]
    FrameEncode(rancor::Error),

    /// Failed bytecheck validation.
    #[error("tick frame rejected: {0}")]
    FrameDecode(rancor::Error),

    #[error("no game mode called {0:?}")]
    UnknownMode(String),

    /// Well-formed but not allowed here.
    #[error("message not allowed: {0}")]
    InvalidMessage(String),
}
