//! Strictly Arena - matchmaking and verified sessions for two-player games
//!
//! Pairs waiting players with the best available opponent and runs each
//! pairing as a tic-tac-toe session that only accepts legal, turn-ordered
//! moves.
//!
//! # Architecture
//!
//! - **Energy**: pure regeneration arithmetic gating entry into the queue
//! - **Matchmaking**: validated entries, pair scoring, rate limiting, expiry
//! - **Session**: per-game state machine with checked invariants
//! - **Directory**: concurrent registry of live sessions
//! - **Arena**: coordinator publishing lifecycle events
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use strictly_arena::{Arena, ArenaConfig, EnergySnapshot, EnrollRequest, JoinOutcome};
//!
//! let arena = Arena::new(ArenaConfig::default());
//! let now = Utc::now();
//! let energy = EnergySnapshot::new(5, 5, now);
//!
//! let alice = EnrollRequest::new("alice".into(), "alice".into(), 10, None, "c1".into());
//! let bob = EnrollRequest::new("bob".into(), "bob_99".into(), 11, Some(1200), "c2".into());
//!
//! arena.join(alice, &energy, now).unwrap();
//! let joined = arena.join(bob, &energy, now).unwrap();
//! assert!(matches!(joined.outcome(), JoinOutcome::Matched(_)));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod arena;
mod config;
mod directory;
mod energy;
mod events;
mod ids;
mod matchmaking;
pub mod session;

pub use arena::{Arena, ArenaError, JoinOutcome, Joined, spawn_sweeper};
pub use config::{ArenaConfig, CONFIG_ENV_VAR, ConfigError, EnergyConfig, MatchmakingConfig};
pub use directory::{DirectoryError, SessionDirectory};
pub use energy::{
    CorruptionReason, EnergyError, EnergyPolicy, EnergySnapshot, EnergyStatus, MAX_ENERGY_INPUT,
};
pub use events::{ArenaEvent, BroadcastSink, EventSink, NullSink};
pub use ids::{MAX_PLAYER_ID_LEN, PlayerId, SessionId};
pub use matchmaking::{
    DISPLAY_NAME_LEN, DisplayName, EnrollError, EnrollRequest, Level, MAX_CONNECTION_LEN,
    MAX_LEVEL, MAX_RATING, MIN_LEVEL, MatchError, MatchOptions, MatchResult, MatchScore,
    MatchmakingQueue, PlayerProfile, QueueEntry, QueuePlacement, QueueStatus, Rating,
    SHORT_WAIT_MS, ValidationError, is_acceptable, score_pair, short_wait,
};
pub use session::{
    GameSession, MoveOutcome, MoveRecord, MoveRejection, Outcome, SessionError, SessionPlayer,
    SessionStatus,
};
