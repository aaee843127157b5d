//! Registry of live game sessions.

use crate::session::invariants::{InvariantSet, SessionInvariants};
use crate::session::{GameSession, MoveOutcome, MoveRejection, SessionError, SessionStatus};
use crate::{MatchResult, PlayerId, SessionId};
use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Directory operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum DirectoryError {
    /// No session with this id.
    #[from(skip)]
    #[display("Session {} not found", _0)]
    NotFound(#[error(not(source))] SessionId),
    /// A session with this id already exists.
    #[from(skip)]
    #[display("Session {} already exists", _0)]
    Duplicate(#[error(not(source))] SessionId),
    /// Only finished sessions can be removed.
    #[from(skip)]
    #[display("Session {} is still active", _0)]
    StillActive(#[error(not(source))] SessionId),
    /// The session offered for registration is not a live, consistent game.
    #[from(skip)]
    #[display("Session {} cannot be registered: {}", id, reason)]
    Invalid {
        /// Offending session.
        id: SessionId,
        /// What is wrong with it.
        reason: String,
    },
    /// The session refused the move or forfeit.
    #[display("{}", _0)]
    Rejected(MoveRejection),
    /// The session could not be created.
    #[display("{}", _0)]
    Session(SessionError),
}

type SharedSession = Arc<Mutex<GameSession>>;

/// Concurrent map of session id to session.
///
/// The map lock is held only to look a session up. Each session has its
/// own lock, so moves in different sessions never wait on each other while
/// moves within one session are serialized.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<Mutex<HashMap<SessionId, SharedSession>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionDirectory {
    /// Creates an empty directory.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating session directory");
        Self::default()
    }

    /// Creates and registers the session for a match.
    #[instrument(skip(self, result), fields(session_id = %result.session_id()))]
    pub fn create(
        &self,
        result: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<GameSession, DirectoryError> {
        let session = GameSession::from_match(result, now)?;
        self.insert(session.clone())?;
        Ok(session)
    }

    /// Registers an already built session.
    ///
    /// Only active sessions whose board, history and turn agree are
    /// accepted.
    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    pub fn insert(&self, session: GameSession) -> Result<(), DirectoryError> {
        let id = session.id();
        if session.status() != SessionStatus::Active {
            warn!(session_id = %id, status = %session.status(), "Refusing finished session");
            return Err(DirectoryError::Invalid {
                id,
                reason: format!("status is {}", session.status()),
            });
        }
        if let Err(violations) = SessionInvariants::check_all(&session) {
            let reason = violations
                .iter()
                .map(|v| v.description.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(session_id = %id, %reason, "Refusing inconsistent session");
            return Err(DirectoryError::Invalid { id, reason });
        }

        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&id) {
            warn!(session_id = %id, "Session already exists");
            return Err(DirectoryError::Duplicate(id));
        }
        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, total = sessions.len(), "Registered session");
        Ok(())
    }

    fn handle(&self, id: SessionId) -> Result<SharedSession, DirectoryError> {
        lock(&self.sessions).get(&id).cloned().ok_or_else(|| {
            debug!(session_id = %id, "Session not found");
            DirectoryError::NotFound(id)
        })
    }

    /// Snapshot of a session.
    pub fn get(&self, id: SessionId) -> Option<GameSession> {
        self.handle(id).ok().map(|s| lock(&s).clone())
    }

    /// Applies a move inside the named session.
    ///
    /// Returns the outcome with a snapshot taken before the session lock is
    /// released, so the snapshot's last history entry is this move.
    #[instrument(skip(self))]
    pub fn apply_move(
        &self,
        id: SessionId,
        mover: &PlayerId,
        row: usize,
        col: usize,
        now: DateTime<Utc>,
    ) -> Result<(MoveOutcome, GameSession), DirectoryError> {
        let session = self.handle(id)?;
        let mut session = lock(&session);
        let outcome = session.apply_move(mover, row, col, now)?;
        Ok((outcome, session.clone()))
    }

    /// Forfeits the named session in favour of `remaining`.
    ///
    /// Returns the finished session.
    #[instrument(skip(self))]
    pub fn abandon(
        &self,
        id: SessionId,
        remaining: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<GameSession, DirectoryError> {
        let session = self.handle(id)?;
        let mut session = lock(&session);
        session.abandon(remaining, now)?;
        Ok(session.clone())
    }

    /// Removes a finished session and returns it.
    #[instrument(skip(self))]
    pub fn remove(&self, id: SessionId) -> Result<GameSession, DirectoryError> {
        let mut sessions = lock(&self.sessions);
        let handle = sessions.get(&id).ok_or(DirectoryError::NotFound(id))?;
        let snapshot = lock(handle).clone();
        if !snapshot.status().is_terminal() {
            warn!(session_id = %id, status = %snapshot.status(), "Refusing to remove live session");
            return Err(DirectoryError::StillActive(id));
        }
        sessions.remove(&id);
        info!(session_id = %id, remaining = sessions.len(), "Removed session");
        Ok(snapshot)
    }

    /// The live session `player` is seated in, if any.
    pub fn active_session_of(&self, player: &PlayerId) -> Option<SessionId> {
        let handles: Vec<_> = lock(&self.sessions).values().cloned().collect();
        handles.into_iter().find_map(|handle| {
            let session = lock(&handle);
            (!session.status().is_terminal() && session.mark_of(player).is_some())
                .then(|| session.id())
        })
    }

    /// Ids of sessions that still accept moves.
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.filter_ids(|s| !s.status().is_terminal())
    }

    /// Ids of sessions that have ended but not been removed.
    pub fn finished_ids(&self) -> Vec<SessionId> {
        self.filter_ids(|s| s.status().is_terminal())
    }

    fn filter_ids(&self, keep: impl Fn(&GameSession) -> bool) -> Vec<SessionId> {
        let handles: Vec<_> = lock(&self.sessions).values().cloned().collect();
        handles
            .iter()
            .filter_map(|handle| {
                let session = lock(handle);
                keep(&session).then(|| session.id())
            })
            .collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
