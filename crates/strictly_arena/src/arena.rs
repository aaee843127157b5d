//! Coordinator tying energy, the queue and the session directory together.

use crate::directory::{DirectoryError, SessionDirectory};
use crate::energy::{EnergyError, EnergyPolicy, EnergySnapshot, EnergyStatus};
use crate::events::{ArenaEvent, EventSink, NullSink};
use crate::matchmaking::{
    EnrollError, EnrollRequest, MatchError, MatchOptions, MatchResult, MatchmakingQueue,
    QueuePlacement,
};
use crate::session::{GameSession, MoveOutcome, Outcome};
use crate::{ArenaConfig, PlayerId, SessionId};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Anything the arena can refuse.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum ArenaError {
    /// Energy check failed.
    #[display("{}", _0)]
    Energy(EnergyError),
    /// Queue refused the player.
    #[display("{}", _0)]
    Enroll(EnrollError),
    /// Match attempt failed.
    #[display("{}", _0)]
    Match(MatchError),
    /// Session lookup or move failed.
    #[display("{}", _0)]
    Directory(DirectoryError),
    /// Player is still seated in a live session.
    #[from(skip)]
    #[display("Player {} is already playing in session {}", player, session_id)]
    AlreadyPlaying {
        /// Who.
        player: PlayerId,
        /// Where.
        session_id: SessionId,
    },
}

/// Where a join left the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Waiting for an opponent.
    Queued(QueuePlacement),
    /// Paired straight away.
    Matched(GameSession),
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct Joined {
    /// Queue placement or the new session.
    outcome: JoinOutcome,
    /// Energy after paying for the game. The caller persists it.
    energy: EnergySnapshot,
}

/// The matchmaking and session core behind one service instance.
///
/// Clones share the same queue, directory and sink.
#[derive(Debug, Clone)]
pub struct Arena {
    config: ArenaConfig,
    energy: EnergyPolicy,
    queue: MatchmakingQueue,
    sessions: SessionDirectory,
    sink: Arc<dyn EventSink>,
}

impl Arena {
    /// Creates an arena that discards events.
    pub fn new(config: ArenaConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Creates an arena publishing to `sink`.
    #[instrument(skip_all)]
    pub fn with_sink(config: ArenaConfig, sink: Arc<dyn EventSink>) -> Self {
        info!("Creating arena");
        Self {
            energy: EnergyPolicy::from_config(config.energy()),
            queue: MatchmakingQueue::new(config.matchmaking().clone()),
            sessions: SessionDirectory::new(),
            sink,
            config,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// The matchmaking queue.
    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    /// The session directory.
    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    /// Current energy for a stored snapshot.
    pub fn energy_status(
        &self,
        snapshot: &EnergySnapshot,
        now: DateTime<Utc>,
    ) -> Result<EnergyStatus, EnergyError> {
        self.energy.current_level(snapshot, now)
    }

    /// Pays for a game, enrolls the player and tries to pair them at once.
    ///
    /// The returned energy snapshot is only meaningful on success; on any
    /// error the caller's stored snapshot stays valid.
    #[instrument(skip(self, request, energy), fields(player_id = %request.id))]
    pub fn join(
        &self,
        request: EnrollRequest,
        energy: &EnergySnapshot,
        now: DateTime<Utc>,
    ) -> Result<Joined, ArenaError> {
        let id = PlayerId::parse(request.id.clone()).map_err(EnrollError::from)?;
        if let Some(session_id) = self.sessions.active_session_of(&id) {
            warn!(player_id = %id, %session_id, "Join while seated in a live session");
            return Err(ArenaError::AlreadyPlaying {
                player: id,
                session_id,
            });
        }

        let spent = self.energy.consume_at(energy, now)?;
        let (placement, matched) =
            self.queue.enroll_and_match(request, MatchOptions::default(), now)?;
        self.sink.publish(ArenaEvent::Enrolled {
            player: id.clone(),
            position: *placement.position(),
        });

        let outcome = match matched {
            Some(result) => JoinOutcome::Matched(self.open_session(&result, now)?),
            None => JoinOutcome::Queued(placement),
        };
        Ok(Joined {
            outcome,
            energy: spent,
        })
    }

    /// Retries pairing for a player already waiting.
    #[instrument(skip(self))]
    pub fn poll(
        &self,
        id: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<Option<GameSession>, ArenaError> {
        match self.queue.attempt_match(id, MatchOptions::default(), now)? {
            Some(result) => Ok(Some(self.open_session(&result, now)?)),
            None => Ok(None),
        }
    }

    fn open_session(
        &self,
        result: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<GameSession, ArenaError> {
        let session = self.sessions.create(result, now)?;
        let (first, second) = result.player_ids();
        self.sink.publish(ArenaEvent::MatchFound {
            session_id: session.id(),
            players: [first.clone(), second.clone()],
            quality: result.quality(),
        });
        Ok(session)
    }

    /// Takes a player out of the queue.
    #[instrument(skip(self))]
    pub fn leave(&self, id: &PlayerId, now: DateTime<Utc>) -> bool {
        let removed = self.queue.withdraw(id, now);
        if removed {
            self.sink.publish(ArenaEvent::Withdrawn { player: id.clone() });
        }
        removed
    }

    /// Applies a move and publishes the result.
    #[instrument(skip(self))]
    pub fn play(
        &self,
        session_id: SessionId,
        mover: &PlayerId,
        row: usize,
        col: usize,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, ArenaError> {
        let (outcome, session) = self.sessions.apply_move(session_id, mover, row, col, now)?;

        if let Some(record) = session.history().last() {
            self.sink.publish(ArenaEvent::MoveApplied {
                session_id,
                mover: mover.clone(),
                position: *record.position(),
                board: session.board().clone(),
                outcome: outcome.clone(),
            });
        }
        if outcome.is_terminal() {
            self.publish_end(&session);
        }
        Ok(outcome)
    }

    /// Ends a session in favour of `remaining`, typically after the other
    /// player disconnected.
    #[instrument(skip(self))]
    pub fn forfeit(
        &self,
        session_id: SessionId,
        remaining: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<GameSession, ArenaError> {
        let session = self.sessions.abandon(session_id, remaining, now)?;
        self.publish_end(&session);
        Ok(session)
    }

    fn publish_end(&self, session: &GameSession) {
        let outcome = session.outcome().unwrap_or(Outcome::Abandoned);
        info!(session_id = %session.id(), %outcome, "Session ended");
        self.sink.publish(ArenaEvent::SessionEnded {
            session_id: session.id(),
            outcome,
            winner: session.winner().cloned(),
        });
    }

    /// Removes a finished session once its outcome has been consumed.
    #[instrument(skip(self))]
    pub fn retire(&self, session_id: SessionId) -> Result<GameSession, ArenaError> {
        Ok(self.sessions.remove(session_id)?)
    }

    /// Purges queue entries older than the configured expiry.
    #[instrument(skip(self))]
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let count = self
            .queue
            .sweep_expired(self.config.matchmaking().expiry(), now);
        if count > 0 {
            self.sink.publish(ArenaEvent::Expired { count });
        } else {
            debug!("Nothing to sweep");
        }
        count
    }
}

/// Runs [`Arena::sweep`] every `every` on the tokio runtime until aborted.
pub fn spawn_sweeper(arena: Arena, every: Duration) -> JoinHandle<()> {
    info!(every_ms = every.as_millis() as u64, "Starting queue sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            arena.sweep(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::TimeDelta;
    use std::collections::HashSet;
    use std::sync::{Mutex, OnceLock};
    use strictly_tictactoe::Square;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn request(id: &str, level: i64) -> EnrollRequest {
        EnrollRequest::new(
            id.to_string(),
            format!("player_{id}"),
            level,
            None,
            format!("conn-{id}"),
        )
    }

    fn full() -> EnergySnapshot {
        EnergySnapshot::new(5, 5, t0())
    }

    fn pid(id: &str) -> PlayerId {
        PlayerId::parse(id).unwrap()
    }

    /// Records every event and lets a listener call back into the arena.
    struct ReactingSink {
        arena: OnceLock<Arena>,
        react: fn(&Arena, &ArenaEvent),
        seen: Mutex<Vec<ArenaEvent>>,
    }

    impl std::fmt::Debug for ReactingSink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("ReactingSink")
        }
    }

    impl EventSink for ReactingSink {
        fn publish(&self, event: ArenaEvent) {
            if let Some(arena) = self.arena.get() {
                (self.react)(arena, &event);
            }
            self.seen.lock().unwrap().push(event);
        }
    }

    fn reacting(react: fn(&Arena, &ArenaEvent)) -> (Arena, Arc<ReactingSink>) {
        let sink = Arc::new(ReactingSink {
            arena: OnceLock::new(),
            react,
            seen: Mutex::new(Vec::new()),
        });
        let arena = Arena::with_sink(ArenaConfig::default(), sink.clone());
        sink.arena.set(arena.clone()).unwrap();
        (arena, sink)
    }

    fn matched(arena: &Arena) -> GameSession {
        arena.join(request("a", 5), &full(), t0()).unwrap();
        let joined = arena.join(request("b", 5), &full(), t0()).unwrap();
        let JoinOutcome::Matched(session) = joined.outcome() else {
            panic!("expected a match");
        };
        session.clone()
    }

    #[test]
    fn test_join_without_energy_is_refused() {
        let arena = Arena::new(ArenaConfig::default());
        let empty = EnergySnapshot::new(0, 5, t0());
        let err = arena.join(request("a", 5), &empty, t0()).unwrap_err();
        assert!(matches!(err, ArenaError::Energy(EnergyError::Insufficient { .. })));
        assert!(arena.queue().is_empty());
    }

    #[test]
    fn test_join_spends_energy_and_queues() {
        let arena = Arena::new(ArenaConfig::default());
        let joined = arena.join(request("a", 5), &full(), t0()).unwrap();
        assert!(matches!(joined.outcome(), JoinOutcome::Queued(_)));
        assert_eq!(*joined.energy().current(), 4);
    }

    #[test]
    fn test_second_compatible_join_matches() {
        let arena = Arena::new(ArenaConfig::default());
        arena.join(request("a", 5), &full(), t0()).unwrap();
        let joined = arena.join(request("b", 6), &full(), t0()).unwrap();
        let JoinOutcome::Matched(session) = joined.outcome() else {
            panic!("expected a match");
        };
        // The joining player requested the match, so they move first.
        assert_eq!(session.players()[0].id, pid("b"));
        assert!(arena.queue().is_empty());

        let err = arena.join(request("a", 5), &full(), t0()).unwrap_err();
        assert!(matches!(err, ArenaError::AlreadyPlaying { .. }));
    }

    #[test]
    fn test_poll_during_join_cannot_take_the_new_entry() {
        let (arena, _sink) = reacting(|arena, event| {
            if matches!(event, ArenaEvent::Enrolled { player, .. } if *player == pid("b")) {
                assert!(arena.poll(&pid("a"), t0()).is_err());
            }
        });

        arena.join(request("a", 5), &full(), t0()).unwrap();
        let joined = arena.join(request("b", 5), &full(), t0()).unwrap();
        let JoinOutcome::Matched(session) = joined.outcome() else {
            panic!("expected a match");
        };
        assert_eq!(*joined.energy().current(), 4);
        assert!(session.mark_of(&pid("a")).is_some());
        assert_eq!(arena.sessions().len(), 1);
        assert!(arena.queue().is_empty());
    }

    #[test]
    fn test_retiring_on_final_move_still_reports_end() {
        let (arena, sink) = reacting(|arena, event| match event {
            ArenaEvent::MoveApplied {
                session_id,
                outcome,
                ..
            } if outcome.is_terminal() => {
                arena.retire(*session_id).unwrap();
            }
            _ => {}
        });
        let session = matched(&arena);
        let id = session.id();
        let x = session.players()[0].id.clone();
        let o = session.players()[1].id.clone();

        for (who, row, col) in [(&x, 0, 0), (&o, 1, 0), (&x, 0, 1), (&o, 1, 1)] {
            arena.play(id, who, row, col, t0()).unwrap();
        }
        let outcome = arena.play(id, &x, 0, 2, t0()).unwrap();
        assert!(matches!(outcome, MoveOutcome::Won { .. }));
        assert!(arena.sessions().is_empty());

        let seen = sink.seen.lock().unwrap();
        let Some(ArenaEvent::SessionEnded {
            outcome, winner, ..
        }) = seen.last()
        else {
            panic!("expected the session end last, got {seen:?}");
        };
        assert_eq!(*outcome, Outcome::Win);
        assert_eq!(winner.as_ref(), Some(&x));
    }

    #[test]
    fn test_racing_moves_report_their_own_board() {
        let (arena, sink) = reacting(|_, _| {});
        let session = matched(&arena);
        let id = session.id();

        std::thread::scope(|scope| {
            for player in session.players() {
                let arena = arena.clone();
                let me = player.id.clone();
                scope.spawn(move || {
                    while arena.sessions().get(id).is_some_and(|s| !s.status().is_terminal()) {
                        for cell in 0..9 {
                            let _ = arena.play(id, &me, cell / 3, cell % 3, t0());
                        }
                    }
                });
            }
        });

        let moves = arena.sessions().get(id).unwrap().history().len();
        let seen = sink.seen.lock().unwrap();
        let mut counts = HashSet::new();
        for event in seen.iter() {
            if let ArenaEvent::MoveApplied {
                mover,
                position,
                board,
                ..
            } = event
            {
                let mark = session.mark_of(mover).unwrap();
                assert_eq!(board.get(*position), Square::Occupied(mark));
                assert!(counts.insert(board.occupied_count()));
            }
        }
        assert_eq!(counts, (1..=moves).collect::<HashSet<_>>());
    }

    #[test]
    fn test_forfeit_then_retire() {
        let arena = Arena::new(ArenaConfig::default());
        arena.join(request("a", 5), &full(), t0()).unwrap();
        let joined = arena.join(request("b", 5), &full(), t0()).unwrap();
        let JoinOutcome::Matched(session) = joined.outcome() else {
            panic!("expected a match");
        };
        let id = session.id();

        assert!(matches!(arena.retire(id), Err(ArenaError::Directory(_))));
        let ended = arena.forfeit(id, &pid("a"), t0()).unwrap();
        assert_eq!(ended.status(), SessionStatus::Abandoned);
        assert!(arena.retire(id).is_ok());
        assert!(arena.sessions().is_empty());
    }

    #[test]
    fn test_sweep_uses_configured_expiry() {
        let arena = Arena::new(ArenaConfig::default());
        arena.join(request("a", 5), &full(), t0()).unwrap();
        assert_eq!(arena.sweep(t0() + TimeDelta::minutes(4)), 0);
        assert_eq!(arena.sweep(t0() + TimeDelta::minutes(6)), 1);
    }
}
