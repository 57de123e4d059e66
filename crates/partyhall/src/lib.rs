//! # partyhall
//!
//! Server-authoritative lobby server for small party games.
//!
//! Players connect over WebSocket, log in, gather in rooms and play one of
//! five modes (gomoku, shooter, werewolf, monopoly, racing). Each room is an
//! actor that owns its match; this crate is the top of the stack: the
//! per-connection router, the server accept loop, configuration and the
//! `partyhall` binary.
//!
//! ```text
//! Transport (WebSocket) → Router (this crate) → Session / Room registry
//!                                                  ↓
//!                                 Room actor → Game rules + Sync + Tick
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use partyhall::prelude::*;
//!
//! # async fn start() -> Result<(), PartyhallError> {
//! let server = PartyhallServer::builder()
//!     .bind("0.0.0.0:8765")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod router;
mod server;

pub use config::{Cli, ServerConfig};
pub use error::PartyhallError;
pub use server::{PartyhallServer, PartyhallServerBuilder};

/// Everything a server binary or an integration test usually needs.
pub mod prelude {
    pub use crate::{Cli, PartyhallError, PartyhallServer, PartyhallServerBuilder, ServerConfig};
    pub use partyhall_protocol::{
        codes, ClientMessage, Codec, Credentials, GameMode, InputFrame, JsonCodec,
        LifecycleState, Outcome, PlayerId, RoomId, RoomSummary, ServerMessage, StateDelta,
        TickFrame,
    };
    pub use partyhall_room::{RegistryConfig, RoomRegistry};
    pub use partyhall_session::{Authenticator, Identity, SessionError, TokenSigner};
}
