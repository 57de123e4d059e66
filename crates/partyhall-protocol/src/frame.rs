//! Binary tick frames.
//!
//! Real-time modes exchange one input per client per tick and one snapshot
//! per client per tick. JSON would dominate the bandwidth at 20 to 30 Hz, so
//! these use a fixed rkyv layout instead. Axes are quantized to `i16`.
//!
//! The snapshot body is the JSON encoding of a
//! [`StateDelta`](crate::StateDelta): the frame header is what the client
//! needs on the hot path (tick, baseline, input ack) without parsing JSON.

use rkyv::rancor;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::ProtocolError;

/// Bit in [`InputFrame::buttons`] for the primary action (fire).
pub const BUTTON_PRIMARY: u16 = 1;

const AXIS_SCALE: f32 = i16::MAX as f32;

/// One client input for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct InputFrame {
    pub room_id: u64,
    /// Monotonic per player; stale or repeated values are dropped.
    pub seq: u64,
    /// Latest snapshot tick the client has applied.
    pub ack_tick: u64,
    /// Quantized analog axes in `-1.0..=1.0`.
    pub axes: [i16; 4],
    /// Bitset of held buttons.
    pub buttons: u16,
}

impl InputFrame {
    /// Builds a frame from float axes, clamping each into range.
    pub fn new(room_id: u64, seq: u64, ack_tick: u64, axes: [f32; 4], buttons: u16) -> Self {
        Self {
            room_id,
            seq,
            ack_tick,
            axes: axes.map(quantize_axis),
            buttons,
        }
    }

    /// Axis `index` as a float in `-1.0..=1.0`; 0.0 for out-of-range indices.
    pub fn axis(&self, index: usize) -> f32 {
        self.axes
            .get(index)
            .map(|v| (*v as f32 / AXIS_SCALE).clamp(-1.0, 1.0))
            .unwrap_or(0.0)
    }

    /// Returns `true` if every bit of `mask` is held.
    pub fn pressed(&self, mask: u16) -> bool {
        self.buttons & mask == mask
    }
}

fn quantize_axis(value: f32) -> i16 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * AXIS_SCALE).round() as i16
}

/// One authoritative snapshot for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub room_id: u64,
    pub tick: u64,
    /// `None` for a full snapshot; otherwise the tick the patch applies to.
    pub base_tick: Option<u64>,
    /// Highest input seq from this recipient that the server has applied.
    pub input_ack: u64,
    /// JSON-encoded [`StateDelta`](crate::StateDelta).
    pub body: Vec<u8>,
}

/// Everything that travels on the binary channel.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum TickFrame {
    Input(InputFrame),
    Snapshot(SnapshotFrame),
}

impl TickFrame {
    /// Archives the frame into bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ProtocolError::FrameEncode)
    }

    /// Validates and decodes a frame.
    ///
    /// Bytes from the socket carry no alignment guarantee, so they are
    /// copied into an aligned buffer before validation.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(ProtocolError::FrameDecode)
    }

    /// The room this frame belongs to.
    pub fn room_id(&self) -> u64 {
        match self {
            Self::Input(input) => input.room_id,
            Self::Snapshot(snapshot) => snapshot.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_frame_survives_encode_decode() {
        let frame = TickFrame::Input(InputFrame::new(
            3,
            17,
            40,
            [1.0, -0.5, 0.0, 0.25],
            BUTTON_PRIMARY,
        ));
        let bytes = frame.encode().unwrap();
        let decoded = TickFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.room_id(), 3);
    }

    #[test]
    fn test_snapshot_frame_survives_unaligned_buffer() {
        let frame = TickFrame::Snapshot(SnapshotFrame {
            room_id: 9,
            tick: 120,
            base_tick: Some(118),
            input_ack: 55,
            body: br#"{"kind":"full","state":{}}"#.to_vec(),
        });
        let bytes = frame.encode().unwrap();

        // Shift by one byte so the slice is misaligned.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let decoded = TickFrame::decode(&shifted[1..]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_truncated_frame_returns_error() {
        let bytes = TickFrame::Input(InputFrame::new(1, 1, 0, [0.0; 4], 0))
            .encode()
            .unwrap();
        let result = TickFrame::decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(ProtocolError::FrameDecode(_))));
    }

    #[test]
    fn test_axis_quantization_clamps_and_recovers() {
        let frame = InputFrame::new(1, 1, 0, [2.0, -3.0, 0.5, f32::NAN], 0);
        assert_eq!(frame.axis(0), 1.0);
        assert_eq!(frame.axis(1), -1.0);
        assert!((frame.axis(2) - 0.5).abs() < 1e-3);
        assert_eq!(frame.axis(3), 0.0);
        assert_eq!(frame.axis(7), 0.0);
    }

    #[test]
    fn test_pressed_checks_button_mask() {
        let frame = InputFrame::new(1, 1, 0, [0.0; 4], BUTTON_PRIMARY);
        assert!(frame.pressed(BUTTON_PRIMARY));
        assert!(!frame.pressed(0b10));
    }
}
