//! Serialization for control traffic.
//!
//! The router only sees the [`Codec`] trait. Tick traffic bypasses it and
//! uses the binary layout in [`TickFrame`](crate::TickFrame).

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ProtocolError;

/// Turns control messages into bytes and back. One instance is shared by
/// every connection task.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// [`ProtocolError::Decode`] when `data` is not a valid `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Same as [`encode`](Self::encode) but ready for a text frame.
    fn encode_text<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        String::from_utf8(self.encode(value)?)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }
}

/// `serde_json` behind [`Codec`].
///
/// ```rust
/// use partyhall_protocol::{ClientMessage, Codec, JsonCodec};
///
/// let heartbeat = ClientMessage::Heartbeat { client_time: 5000 };
/// let wire = JsonCodec.encode_text(&heartbeat).unwrap();
/// let back: ClientMessage = JsonCodec.decode(wire.as_bytes()).unwrap();
/// assert_eq!(back, heartbeat);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn encode_text<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }
}
