//! Rooms for partyhall.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! seats and its match. Nothing else mutates game state.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: creates rooms, enforces one room per player,
//!   answers the lobby list and publishes lobby events
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`Outbound`]: what a room delivers to a player's connection
//! - [`RoomConfig`], [`RegistryConfig`], [`RoomOptions`]: room settings
//!
//! ```text
//! Router (above)  ← create / join / action / input / disconnect
//!     ↕
//! Room Layer (this crate)  ← registry + one actor per room
//!     ↕
//! Game / Sync / Tick (below)
//! ```

mod config;
mod error;
mod registry;
mod room;

pub use config::{RegistryConfig, RoomConfig, RoomOptions};
pub use error::{CapacityError, FatalRoomError, RoomError};
pub use registry::RoomRegistry;
pub use room::{Outbound, PlayerSender, RoomHandle};
