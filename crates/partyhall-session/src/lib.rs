//! Player session management for partyhall.
//!
//! This crate handles who a connection belongs to:
//!
//! 1. **Authentication**: the [`Authenticator`] trait and the default
//!    [`TokenAuthenticator`], which accepts signed session tokens and,
//!    when enabled, guest logins.
//! 2. **Session tokens**: [`TokenSigner`] issues and verifies the tokens
//!    handed out at login.
//! 3. **Session tracking**: [`SessionManager`] knows who is connected,
//!    who dropped recently, and lets a player resume within the grace period
//!    using a one-off resume token.
//!
//! ```text
//! Router (above)  ← calls authenticate + login on every Login message
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← PlayerId, Credentials
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;
mod token;

pub use auth::{Authenticator, Identity, TokenAuthenticator};
pub use error::SessionError;
pub use manager::{LoginOutcome, SessionManager};
pub use session::{Session, SessionConfig, SessionState};
pub use token::{Claims, TokenSigner};
