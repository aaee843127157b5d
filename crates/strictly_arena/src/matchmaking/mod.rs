//! Matchmaking: validated queue entries, pairing score and the shared queue.

mod entry;
mod queue;
mod rate_limit;
mod scoring;

pub use entry::{
    DISPLAY_NAME_LEN, DisplayName, EnrollRequest, Level, MAX_CONNECTION_LEN, MAX_LEVEL,
    MAX_RATING, MIN_LEVEL, PlayerProfile, QueueEntry, Rating, ValidationError,
};
pub use queue::{
    EnrollError, MatchError, MatchOptions, MatchResult, MatchmakingQueue, QueuePlacement,
    QueueStatus, SHORT_WAIT_MS, short_wait,
};
pub use scoring::{MatchScore, is_acceptable, score_pair};
