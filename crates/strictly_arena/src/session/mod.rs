//! Game sessions: one board, two bound players, an append-only history.

mod action;
mod game;
pub mod invariants;

pub use action::{MoveOutcome, MoveRecord, MoveRejection};
pub use game::{GameSession, Outcome, SessionError, SessionPlayer, SessionStatus};
