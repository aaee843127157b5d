//! Tests for board rules through the public API.

use strictly_tictactoe::{Board, Line, Mark, Position, Square, rules};

const X: Square = Square::Occupied(Mark::X);
const O: Square = Square::Occupied(Mark::O);
const E: Square = Square::Empty;

#[test]
fn test_top_row_win() {
    let board = Board::from_rows([[X, X, X], [E, O, E], [E, E, O]]);
    let line = rules::winning_line(&board).expect("X should win");
    assert_eq!(line.mark(), Mark::X);
    assert_eq!(line.line(), Line::Row(0));
    assert!(!rules::is_draw(&board));
}

#[test]
fn test_full_board_without_line_is_draw() {
    let board = Board::from_rows([[X, O, X], [O, O, X], [O, X, O]]);
    assert_eq!(rules::check_winner(&board), None);
    assert!(rules::is_draw(&board));
}

#[test]
fn test_column_and_diagonal_wins() {
    let column = Board::from_rows([[E, O, X], [E, O, X], [X, O, E]]);
    assert_eq!(
        rules::winning_line(&column).map(|w| (w.mark(), w.line())),
        Some((Mark::O, Line::Column(1)))
    );

    let diagonal = Board::from_rows([[X, O, E], [O, X, E], [E, E, X]]);
    assert_eq!(
        rules::winning_line(&diagonal).map(|w| w.line()),
        Some(Line::Diagonal)
    );
}

#[test]
fn test_empty_positions_shrink_as_marks_are_placed() {
    let mut board = Board::new();
    board.set(Position::TopLeft, X);
    board.set(Position::Center, O);

    let free = board.empty_positions();
    assert_eq!(free.len(), 7);
    assert!(!free.contains(&Position::TopLeft));
    assert!(!free.contains(&Position::Center));
    assert!(free.contains(&Position::BottomRight));
}

#[test]
fn test_board_serializes_as_squares() {
    let mut board = Board::new();
    board.set(Position::Center, X);
    let json = serde_json::to_string(&board).expect("serialize");
    assert!(json.contains("\"Occupied\":\"X\""));
}
