//! The built-in game modes.

pub mod gomoku;
pub mod monopoly;
pub mod racing;
pub mod shooter;
pub mod werewolf;

pub use gomoku::Gomoku;
pub use monopoly::Monopoly;
pub use racing::Racing;
pub use shooter::Shooter;
pub use werewolf::Werewolf;

use crate::{GameFault, GameRules, SeatedPlayer};

/// Rejects a seat list outside the mode's player range.
pub(crate) fn check_seats<G: GameRules>(seats: &[SeatedPlayer]) -> Result<(), GameFault> {
    if (G::MIN_PLAYERS..=G::MAX_PLAYERS).contains(&seats.len()) {
        Ok(())
    } else {
        Err(GameFault::PlayerCount {
            got: seats.len(),
            min: G::MIN_PLAYERS,
            max: G::MAX_PLAYERS,
        })
    }
}
