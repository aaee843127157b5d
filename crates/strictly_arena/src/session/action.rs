//! Moves as first-class records and the results of applying them.

use super::SessionStatus;
use crate::PlayerId;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use strictly_tictactoe::{Mark, Position, WinningLine};

/// An applied move. Immutable once appended to a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct MoveRecord {
    mover: PlayerId,
    position: Position,
    mark: Mark,
    played_at: DateTime<Utc>,
}

impl MoveRecord {
    pub(crate) fn new(
        mover: PlayerId,
        position: Position,
        mark: Mark,
        played_at: DateTime<Utc>,
    ) -> Self {
        Self {
            mover,
            position,
            mark,
            played_at,
        }
    }

    /// Zero-based row.
    pub fn row(&self) -> usize {
        self.position.row()
    }

    /// Zero-based column.
    pub fn col(&self) -> usize {
        self.position.col()
    }
}

impl std::fmt::Display for MoveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) -> {}", self.mover, self.mark, self.position)
    }
}

/// What an accepted move did to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Game goes on.
    Continue {
        /// Mark to move next.
        next: Mark,
        /// Player to move next.
        next_player: PlayerId,
    },
    /// The mover completed a line.
    Won {
        /// The mover.
        winner: PlayerId,
        /// The completed line.
        line: WinningLine,
    },
    /// Board filled with no completed line.
    Draw,
}

impl MoveOutcome {
    /// Whether the move ended the game.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MoveOutcome::Continue { .. })
    }
}

/// A refused move or forfeit. The session is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MoveRejection {
    /// Session is not accepting moves.
    #[display("Session is {}, not active", _0)]
    SessionNotActive(#[error(not(source))] SessionStatus),
    /// Caller is not one of the two bound players.
    #[display("Player {} is not in this session", _0)]
    NotAParticipant(#[error(not(source))] PlayerId),
    /// Caller moved out of turn.
    #[display("Not your turn, waiting for {}", expected)]
    WrongTurn {
        /// Mark whose turn it is.
        expected: Mark,
    },
    /// Coordinates outside the grid.
    #[display("Cell ({}, {}) is outside the 3x3 grid", row, col)]
    OutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },
    /// Target square already holds a mark.
    #[display("{} is already occupied", _0)]
    SquareOccupied(#[error(not(source))] Position),
}
