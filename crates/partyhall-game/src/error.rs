//! Error types for game rules.

/// Why an action was refused. Sent back to the actor as
/// `ActionRejected { reason }`; the state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("it is not your turn")]
    NotYourTurn,

    #[error("you are not playing in this match")]
    NotSeated,

    #[error("you have been eliminated")]
    Eliminated,

    #[error("the match is over")]
    GameOver,

    #[error("position is off the board")]
    OutOfBounds,

    #[error("position is already taken")]
    Occupied,

    /// The action exists but not in the current phase.
    #[error("not allowed during {0}")]
    WrongPhase(String),

    /// The action isn't available to this player (wrong role, already used).
    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("not enough money")]
    InsufficientFunds,

    /// The payload didn't decode into an action for this mode.
    #[error("malformed action: {0}")]
    Malformed(String),
}

/// A rules hook could not produce a state at all. Unlike a rejection, this
/// ends the match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameFault {
    #[error("cannot start with {got} players (needs {min} to {max})")]
    PlayerCount { got: usize, min: usize, max: usize },

    #[error("game invariant broken: {0}")]
    Invariant(String),
}
