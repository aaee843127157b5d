//! Win detection logic for tic-tac-toe.

use crate::{Board, Mark, Position, Square};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// One of the eight lines that can complete a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Line {
    /// A row, 0 = top.
    #[display("row {}", _0)]
    Row(usize),
    /// A column, 0 = left.
    #[display("column {}", _0)]
    Column(usize),
    /// Top-left to bottom-right.
    #[display("diagonal")]
    Diagonal,
    /// Top-right to bottom-left.
    #[display("anti-diagonal")]
    AntiDiagonal,
}

/// All lines in evaluation order: rows, then columns, then diagonals.
pub const LINES: [(Line, [Position; 3]); 8] = [
    (
        Line::Row(0),
        [Position::TopLeft, Position::TopCenter, Position::TopRight],
    ),
    (
        Line::Row(1),
        [Position::MiddleLeft, Position::Center, Position::MiddleRight],
    ),
    (
        Line::Row(2),
        [
            Position::BottomLeft,
            Position::BottomCenter,
            Position::BottomRight,
        ],
    ),
    (
        Line::Column(0),
        [Position::TopLeft, Position::MiddleLeft, Position::BottomLeft],
    ),
    (
        Line::Column(1),
        [Position::TopCenter, Position::Center, Position::BottomCenter],
    ),
    (
        Line::Column(2),
        [Position::TopRight, Position::MiddleRight, Position::BottomRight],
    ),
    (
        Line::Diagonal,
        [Position::TopLeft, Position::Center, Position::BottomRight],
    ),
    (
        Line::AntiDiagonal,
        [Position::TopRight, Position::Center, Position::BottomLeft],
    ),
];

/// A completed line and the mark that completed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{} wins on {}", mark, line)]
pub struct WinningLine {
    mark: Mark,
    line: Line,
}

impl WinningLine {
    /// The winning mark.
    pub fn mark(&self) -> Mark {
        self.mark
    }

    /// The completed line.
    pub fn line(&self) -> Line {
        self.line
    }
}

/// Finds the first completed line on the board.
///
/// Lines are checked rows first, then columns, then diagonals. A line only
/// counts when all three squares hold the same mark.
#[instrument(skip(board))]
pub fn winning_line(board: &Board) -> Option<WinningLine> {
    LINES.iter().find_map(|(line, [a, b, c])| {
        let sq = board.get(*a);
        match sq {
            Square::Occupied(mark) if sq == board.get(*b) && sq == board.get(*c) => {
                Some(WinningLine { mark, line: *line })
            }
            _ => None,
        }
    })
}

/// Checks if there is a winner on the board.
///
/// Returns `Some(mark)` if the mark has three in a row, `None` otherwise.
pub fn check_winner(board: &Board) -> Option<Mark> {
    winning_line(board).map(|w| w.mark)
}
