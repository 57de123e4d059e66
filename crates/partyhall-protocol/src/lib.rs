//! Wire protocol for partyhall.
//!
//! This crate defines everything that travels between client and server:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`RoomSummary`], ...)
//!   are JSON control and lobby messages, internally tagged by `"type"`.
//! - **Frames** ([`TickFrame`]) are the compact binary encoding (rkyv) used
//!   for per-tick input and snapshots of real-time modes.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) turns control messages into
//!   bytes and back.
//! - **Errors** ([`ProtocolError`]) cover everything that can go wrong while
//!   encoding or decoding.
//!
//! ```text
//! Transport (text | binary) → Protocol (ClientMessage | TickFrame) → Router
//! ```

mod codec;
mod error;
mod frame;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frame::{InputFrame, SnapshotFrame, TickFrame, BUTTON_PRIMARY};
pub use types::{
    codes, ClientMessage, Credentials, GameMode, LifecycleState, Outcome,
    PlayerId, Recipient, RoomId, RoomSummary, SeatInfo, ServerMessage,
    StateDelta,
};
