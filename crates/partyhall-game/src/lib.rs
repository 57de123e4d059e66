//! Game rules for partyhall.
//!
//! This crate is pure logic: no sockets, no tasks, no clock.
//!
//! - **Contract** ([`GameRules`]) is the trait every mode implements. The
//!   room actor drives it and owns the state.
//! - **Modes** ([`Gomoku`], [`Shooter`], [`Werewolf`], [`Monopoly`],
//!   [`Racing`]) are the built-in rule sets.
//! - **Instances** ([`GameInstance`], [`Match`]) hold a running match and
//!   apply each step the rules return.
//!
//! ```text
//! Room actor (above)  ← apply_action / apply_input / tick / timeout
//!     ↕
//! Game Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← PlayerId, Outcome, InputFrame
//! ```

mod contract;
mod error;
mod instance;
pub mod modes;

pub use contract::{
    mix, ControlInput, Effect, GameRules, MatchConfig, SeatedPlayer, Step, Verdict,
};
pub use error::{GameFault, ValidationError};
pub use instance::{GameInstance, Match, ModeInfo};
pub use modes::{Gomoku, Monopoly, Racing, Shooter, Werewolf};
