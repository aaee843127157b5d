//! Pure tic-tac-toe grid logic.
//!
//! This crate knows nothing about players, queues or sessions. It provides
//! the board, the nine positions addressed by row and column, and the rules
//! that decide whether a line has been completed or the board has filled up.
//!
//! # Example
//!
//! ```
//! use strictly_tictactoe::{Board, Line, Mark, Position, Square, rules};
//!
//! let mut board = Board::new();
//! for col in 0..3 {
//!     let pos = Position::from_row_col(0, col).unwrap();
//!     board.set(pos, Square::Occupied(Mark::X));
//! }
//!
//! let line = rules::winning_line(&board).unwrap();
//! assert_eq!(line.mark(), Mark::X);
//! assert_eq!(line.line(), Line::Row(0));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod position;
pub mod rules;
mod types;

pub use position::Position;
pub use rules::{Line, WinningLine};
pub use types::{Board, Mark, Square};
