//! Properties every [`GameSession`] must satisfy after each transition.
//!
//! Checked in debug builds after every mutation and testable on their own.

use super::{GameSession, SessionStatus};
use strictly_tictactoe::{Board, Mark, Square};

/// A logical property that must hold for a given state.
pub trait Invariant<S> {
    /// Checks if the invariant holds for the given state.
    fn holds(state: &S) -> bool;

    /// Human-readable description of the invariant.
    fn description() -> &'static str;
}

/// Violation of an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Description of the violated invariant.
    pub description: String,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Invariants checked together. Implemented for tuples.
pub trait InvariantSet<S> {
    /// Returns every violated invariant.
    fn check_all(state: &S) -> Result<(), Vec<InvariantViolation>>;
}

impl<S, I1, I2> InvariantSet<S> for (I1, I2)
where
    I1: Invariant<S>,
    I2: Invariant<S>,
{
    fn check_all(state: &S) -> Result<(), Vec<InvariantViolation>> {
        let mut violations = Vec::new();
        if !I1::holds(state) {
            violations.push(InvariantViolation::new(I1::description()));
        }
        if !I2::holds(state) {
            violations.push(InvariantViolation::new(I2::description()));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl<S, I1, I2, I3> InvariantSet<S> for (I1, I2, I3)
where
    I1: Invariant<S>,
    I2: Invariant<S>,
    I3: Invariant<S>,
{
    fn check_all(state: &S) -> Result<(), Vec<InvariantViolation>> {
        let mut violations = match <(I1, I2)>::check_all(state) {
            Ok(()) => Vec::new(),
            Err(v) => v,
        };
        if !I3::holds(state) {
            violations.push(InvariantViolation::new(I3::description()));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Replaying the history onto an empty board reproduces the board, and each
/// record carries its mover's bound mark.
pub struct HistoryConsistent;

impl Invariant<GameSession> for HistoryConsistent {
    fn holds(session: &GameSession) -> bool {
        let mut replay = Board::new();
        for record in session.history() {
            if session.mark_of(record.mover()) != Some(*record.mark()) {
                return false;
            }
            if !replay.is_empty(*record.position()) {
                return false;
            }
            replay.set(*record.position(), Square::Occupied(*record.mark()));
        }
        replay == *session.board()
    }

    fn description() -> &'static str {
        "Board matches replayed move history"
    }
}

/// X moves first and marks alternate. While active, the side to move is
/// the one after the last record.
pub struct AlternatingTurn;

impl Invariant<GameSession> for AlternatingTurn {
    fn holds(session: &GameSession) -> bool {
        let mut expected = Mark::X;
        for record in session.history() {
            if *record.mark() != expected {
                return false;
            }
            expected = expected.opponent();
        }
        session.status() != SessionStatus::Active || session.to_move() == expected
    }

    fn description() -> &'static str {
        "Players alternate turns starting with X"
    }
}

/// Two different identities hold X and O.
pub struct DistinctPlayers;

impl Invariant<GameSession> for DistinctPlayers {
    fn holds(session: &GameSession) -> bool {
        let [x, o] = session.players();
        x.id != o.id && x.mark == Mark::X && o.mark == Mark::O
    }

    fn description() -> &'static str {
        "Session binds two distinct players to X and O"
    }
}

/// Everything checked after a session transition.
pub type SessionInvariants = (HistoryConsistent, AlternatingTurn, DistinctPlayers);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PlayerId, SessionId};
    use chrono::{DateTime, Utc};
    use strictly_tictactoe::Position;

    fn session() -> GameSession {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        GameSession::start(
            SessionId::new(),
            PlayerId::parse("a").unwrap(),
            PlayerId::parse("b").unwrap(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_session_holds() {
        assert!(SessionInvariants::check_all(&session()).is_ok());
    }

    #[test]
    fn test_holds_after_moves() {
        let mut s = session();
        let now = s.created_at();
        let a = PlayerId::parse("a").unwrap();
        let b = PlayerId::parse("b").unwrap();
        s.apply_move(&a, 0, 0, now).unwrap();
        s.apply_move(&b, 1, 1, now).unwrap();
        assert!(SessionInvariants::check_all(&s).is_ok());
    }

    #[test]
    fn test_detects_tampered_board() {
        let mut s = session();
        s.board.set(Position::Center, Square::Occupied(Mark::O));
        let violations = SessionInvariants::check_all(&s).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].description, HistoryConsistent::description());
    }

    #[test]
    fn test_detects_skipped_turn() {
        let mut s = session();
        s.to_move = Mark::O;
        assert!(!AlternatingTurn::holds(&s));
        assert!(<(HistoryConsistent, DistinctPlayers)>::check_all(&s).is_ok());
    }

    #[test]
    fn test_detects_shared_identity() {
        let mut s = session();
        s.players[1].id = s.players[0].id.clone();
        assert!(!DistinctPlayers::holds(&s));
    }
}
