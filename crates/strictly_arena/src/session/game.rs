//! The per-session state machine.
//!
//! `Waiting -> Active -> {Completed | Abandoned}`. Sessions built by this
//! crate start `Active` because both players are known from the match.
//! Terminal states are final: every mutating call on them is rejected
//! before anything is touched.

use super::action::{MoveOutcome, MoveRecord, MoveRejection};
use super::invariants::{InvariantSet, SessionInvariants};
use crate::{MatchResult, PlayerId, SessionId};
use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use strictly_tictactoe::{Board, Mark, Position, Square, WinningLine, rules};
use tracing::{debug, info, instrument, warn};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Pre-pairing room. Never produced by this crate.
    #[display("waiting")]
    Waiting,
    /// Moves are accepted.
    #[display("active")]
    Active,
    /// Ended by a win or a draw.
    #[display("completed")]
    Completed,
    /// Ended by a forfeit.
    #[display("abandoned")]
    Abandoned,
}

impl SessionStatus {
    /// Whether the status can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// A player completed a line.
    #[display("win")]
    Win,
    /// Full board, no line.
    #[display("draw")]
    Draw,
    /// A player left; the other wins.
    #[display("abandoned")]
    Abandoned,
}

/// Session could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SessionError {
    /// Both seats given to the same identity.
    #[display("Player {} cannot play against themselves", _0)]
    SamePlayer(#[error(not(source))] PlayerId),
}

/// A player bound to a mark for the whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlayer {
    /// Identity.
    pub id: PlayerId,
    /// Name for reporting.
    pub display_name: String,
    /// Mark for the whole session.
    pub mark: Mark,
}

/// One two-player game with its own board and move history.
///
/// Serializable for reporting. There is no way to rebuild one from data, so
/// every session in play went through [`GameSession::start`] and its moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSession {
    pub(crate) id: SessionId,
    pub(crate) players: [SessionPlayer; 2],
    pub(crate) board: Board,
    pub(crate) to_move: Mark,
    pub(crate) status: SessionStatus,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) winner: Option<PlayerId>,
    pub(crate) winning_line: Option<WinningLine>,
    pub(crate) history: Vec<MoveRecord>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// Starts an active session. `first` plays X and moves first.
    ///
    /// # Errors
    ///
    /// [`SessionError::SamePlayer`] if both identities are equal.
    #[instrument]
    pub fn start(
        id: SessionId,
        first: PlayerId,
        second: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        let first_name = first.to_string();
        let second_name = second.to_string();
        Self::start_named(id, (first, first_name), (second, second_name), now)
    }

    /// Starts a session from a match, binding players in match order.
    #[instrument(skip(result), fields(session_id = %result.session_id()))]
    pub fn from_match(result: &MatchResult, now: DateTime<Utc>) -> Result<Self, SessionError> {
        let first = result.first().profile();
        let second = result.second().profile();
        Self::start_named(
            *result.session_id(),
            (first.id().clone(), first.display_name().to_string()),
            (second.id().clone(), second.display_name().to_string()),
            now,
        )
    }

    fn start_named(
        id: SessionId,
        first: (PlayerId, String),
        second: (PlayerId, String),
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if first.0 == second.0 {
            warn!(player_id = %first.0, "Refusing self-match session");
            return Err(SessionError::SamePlayer(first.0));
        }

        info!(session_id = %id, x = %first.0, o = %second.0, "Creating game session");
        Ok(Self {
            id,
            players: [
                SessionPlayer {
                    id: first.0,
                    display_name: first.1,
                    mark: Mark::X,
                },
                SessionPlayer {
                    id: second.0,
                    display_name: second.1,
                    mark: Mark::O,
                },
            ],
            board: Board::new(),
            to_move: Mark::X,
            status: SessionStatus::Active,
            outcome: None,
            winner: None,
            winning_line: None,
            history: Vec::new(),
            created_at: now,
            ended_at: None,
        })
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Both players, X first.
    pub fn players(&self) -> &[SessionPlayer; 2] {
        &self.players
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Mark whose turn it is.
    pub fn to_move(&self) -> Mark {
        self.to_move
    }

    /// Lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Outcome, once terminal.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Winner, for wins and forfeits.
    pub fn winner(&self) -> Option<&PlayerId> {
        self.winner.as_ref()
    }

    /// Completed line, for wins.
    pub fn winning_line(&self) -> Option<WinningLine> {
        self.winning_line
    }

    /// Applied moves, oldest first.
    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// End time, once terminal.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Player holding `mark`.
    pub fn player_for(&self, mark: Mark) -> &SessionPlayer {
        match mark {
            Mark::X => &self.players[0],
            Mark::O => &self.players[1],
        }
    }

    /// Mark bound to `id`, if `id` plays in this session.
    pub fn mark_of(&self, id: &PlayerId) -> Option<Mark> {
        self.players.iter().find(|p| &p.id == id).map(|p| p.mark)
    }

    /// The other player, if `id` plays in this session.
    pub fn opponent_of(&self, id: &PlayerId) -> Option<&PlayerId> {
        self.mark_of(id).map(|mark| &self.player_for(mark.opponent()).id)
    }

    /// Whether a mark may be placed at `(row, col)` right now.
    ///
    /// Coordinates must be in `0..=2`, the square empty and the session
    /// active. Turn order is checked separately by [`Self::apply_move`].
    pub fn is_legal_move(&self, row: usize, col: usize) -> bool {
        self.status == SessionStatus::Active
            && Position::from_row_col(row, col).is_some_and(|pos| self.board.is_empty(pos))
    }

    /// Applies a move by `mover` at `(row, col)`.
    ///
    /// # Errors
    ///
    /// Rejects moves on a non-active session, by non-participants, out of
    /// turn, outside the grid, or onto an occupied square. A rejected move
    /// leaves the session untouched.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn apply_move(
        &mut self,
        mover: &PlayerId,
        row: usize,
        col: usize,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, MoveRejection> {
        self.ensure_active()?;

        let mark = self.mark_of(mover).ok_or_else(|| {
            warn!(player_id = %mover, "Move from non-participant");
            MoveRejection::NotAParticipant(mover.clone())
        })?;

        if mark != self.to_move {
            warn!(player_id = %mover, expected = %self.to_move, "Move out of turn");
            return Err(MoveRejection::WrongTurn {
                expected: self.to_move,
            });
        }

        let pos = Position::from_row_col(row, col).ok_or_else(|| {
            warn!(row, col, "Move outside grid");
            MoveRejection::OutOfBounds { row, col }
        })?;

        if !self.board.is_empty(pos) {
            warn!(%pos, "Move onto occupied square");
            return Err(MoveRejection::SquareOccupied(pos));
        }

        self.board.set(pos, Square::Occupied(mark));
        self.history
            .push(MoveRecord::new(mover.clone(), pos, mark, now));
        debug!(player_id = %mover, %mark, %pos, moves = self.history.len(), "Move applied");

        let outcome = if let Some(line) = rules::winning_line(&self.board) {
            self.finish(SessionStatus::Completed, Outcome::Win, Some(mover.clone()), now);
            self.winning_line = Some(line);
            info!(winner = %mover, %line, "Session won");
            MoveOutcome::Won {
                winner: mover.clone(),
                line,
            }
        } else if rules::is_full(&self.board) {
            self.finish(SessionStatus::Completed, Outcome::Draw, None, now);
            info!("Session drawn");
            MoveOutcome::Draw
        } else {
            self.to_move = mark.opponent();
            MoveOutcome::Continue {
                next: self.to_move,
                next_player: self.player_for(self.to_move).id.clone(),
            }
        };

        self.debug_check();
        Ok(outcome)
    }

    /// Ends the session as a forfeit won by `remaining`.
    ///
    /// # Errors
    ///
    /// Rejects non-active sessions and identities not in the session.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn abandon(
        &mut self,
        remaining: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<(), MoveRejection> {
        self.ensure_active()?;
        if self.mark_of(remaining).is_none() {
            warn!(player_id = %remaining, "Forfeit naming a non-participant");
            return Err(MoveRejection::NotAParticipant(remaining.clone()));
        }

        self.finish(
            SessionStatus::Abandoned,
            Outcome::Abandoned,
            Some(remaining.clone()),
            now,
        );
        info!(winner = %remaining, "Session abandoned");
        self.debug_check();
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), MoveRejection> {
        if self.status != SessionStatus::Active {
            debug!(status = %self.status, "Session not active");
            return Err(MoveRejection::SessionNotActive(self.status));
        }
        Ok(())
    }

    fn finish(
        &mut self,
        status: SessionStatus,
        outcome: Outcome,
        winner: Option<PlayerId>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.outcome = Some(outcome);
        self.winner = winner;
        self.ended_at = Some(now);
    }

    fn debug_check(&self) {
        if let Err(violations) = SessionInvariants::check_all(self) {
            for v in &violations {
                warn!(session_id = %self.id, violation = %v.description, "Invariant violated");
            }
            debug_assert!(violations.is_empty(), "session invariants violated");
        }
    }
}
