//! The matchmaking queue.

use super::rate_limit::RateLimiter;
use super::scoring::{MatchScore, is_acceptable, score_pair};
use super::{EnrollRequest, PlayerProfile, QueueEntry, ValidationError};
use crate::{MatchmakingConfig, PlayerId, SessionId};
use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Estimate, in milliseconds, given when a compatible opponent is already waiting.
pub const SHORT_WAIT_MS: i64 = 5_000;

/// [`SHORT_WAIT_MS`] as a time delta.
pub fn short_wait() -> TimeDelta {
    TimeDelta::milliseconds(SHORT_WAIT_MS)
}

/// Per-call overrides for [`MatchmakingQueue::attempt_match`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Level tolerance instead of the configured one.
    pub level_tolerance: Option<u32>,
    /// Fairness window instead of the configured one.
    pub max_wait: Option<TimeDelta>,
}

/// A pairing produced by the queue. Created exactly once per pairing.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
pub struct MatchResult {
    session_id: SessionId,
    first: QueueEntry,
    second: QueueEntry,
    score: MatchScore,
    matched_at: DateTime<Utc>,
}

impl MatchResult {
    /// Both identities, first player first.
    pub fn player_ids(&self) -> (&PlayerId, &PlayerId) {
        (self.first.id(), self.second.id())
    }

    /// Overall quality in `[0, 1]`.
    pub fn quality(&self) -> f64 {
        *self.score.total()
    }
}

/// Where an enrolled player sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct QueuePlacement {
    position: usize,
    estimated_wait: TimeDelta,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct QueueStatus {
    waiting: usize,
    matches_made: u64,
    expired: u64,
}

/// Enrollment rejection.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum EnrollError {
    /// Malformed player data.
    #[display("Invalid player data: {}", _0)]
    Invalid(ValidationError),
    /// Identity already waiting.
    #[from(skip)]
    #[display("Player {} is already enrolled", _0)]
    AlreadyEnrolled(#[error(not(source))] PlayerId),
    /// Too many enroll/withdraw actions in the window.
    #[from(skip)]
    #[display(
        "Player {} exceeded the queue action limit, retry in {}s",
        player,
        retry_after.num_seconds()
    )]
    RateLimited {
        /// Offending identity.
        player: PlayerId,
        /// Time until an action frees up.
        retry_after: TimeDelta,
    },
}

/// Match attempt rejection.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MatchError {
    /// Requester is not waiting in this queue.
    #[display("Player {} is not enrolled", _0)]
    NotEnrolled(#[error(not(source))] PlayerId),
}

#[derive(Debug)]
struct QueueState {
    entries: HashMap<PlayerId, QueueEntry>,
    limiter: RateLimiter,
    next_sequence: u64,
    matches_made: u64,
    expired: u64,
}

impl QueueState {
    fn enroll(
        &mut self,
        profile: PlayerProfile,
        tolerance: u32,
        max_wait: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<QueuePlacement, EnrollError> {
        let id = profile.id().clone();

        if let Err(retry_after) = self.limiter.try_acquire(&id, now) {
            warn!(player_id = %id, "Enrollment rate limited");
            return Err(EnrollError::RateLimited {
                player: id,
                retry_after,
            });
        }

        if self.entries.contains_key(&id) {
            warn!(player_id = %id, "Duplicate enrollment");
            return Err(EnrollError::AlreadyEnrolled(id));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let estimated_wait = self.estimated_wait(&profile, tolerance, max_wait);
        self.entries
            .insert(id.clone(), QueueEntry::new(profile, now, sequence));

        let position = self.position(&id).unwrap_or(self.entries.len());
        info!(player_id = %id, position, waiting = self.entries.len(), "Player enrolled");
        Ok(QueuePlacement {
            position,
            estimated_wait,
        })
    }

    fn take_match(
        &mut self,
        id: &PlayerId,
        tolerance: u32,
        max_wait: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchResult>, MatchError> {
        let requester = self
            .entries
            .get(id)
            .ok_or_else(|| MatchError::NotEnrolled(id.clone()))?;

        let mut best: Option<(&QueueEntry, MatchScore)> = None;
        for candidate in self.entries.values() {
            if candidate.id() == id
                || !is_acceptable(requester, candidate, tolerance, max_wait, now)
            {
                continue;
            }
            let score = score_pair(requester, candidate, tolerance, max_wait, now);
            debug!(candidate = %candidate.id(), total = score.total(), "Scored candidate");

            let better = match &best {
                None => true,
                Some((current, current_score)) => {
                    score.total() > current_score.total()
                        || (score.total() == current_score.total()
                            && candidate.queue_order() < current.queue_order())
                }
            };
            if better {
                best = Some((candidate, score));
            }
        }

        let Some((candidate, score)) = best else {
            debug!(player_id = %id, "No acceptable opponent yet");
            return Ok(None);
        };
        let candidate_id = candidate.id().clone();

        let (Some(first), Some(second)) =
            (self.entries.remove(id), self.entries.remove(&candidate_id))
        else {
            return Err(MatchError::NotEnrolled(id.clone()));
        };
        self.matches_made += 1;

        let result = MatchResult {
            session_id: SessionId::new(),
            first,
            second,
            score,
            matched_at: now,
        };
        info!(
            session_id = %result.session_id,
            first = %id,
            second = %candidate_id,
            quality = result.quality(),
            "Players matched"
        );
        Ok(Some(result))
    }

    fn ordered(&self) -> Vec<&QueueEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.queue_order());
        entries
    }

    fn position(&self, id: &PlayerId) -> Option<usize> {
        let entry = self.entries.get(id)?;
        let key = entry.queue_order();
        Some(
            self.entries
                .values()
                .filter(|e| e.queue_order() < key)
                .count()
                + 1,
        )
    }

    fn estimated_wait(
        &self,
        profile: &PlayerProfile,
        tolerance: u32,
        max_wait: TimeDelta,
    ) -> TimeDelta {
        let others: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.id() != profile.id())
            .collect();

        if others.is_empty() {
            return max_wait;
        }

        let level = *profile.level();
        if others.iter().any(|e| e.level().gap(level) <= tolerance) {
            return short_wait().min(max_wait);
        }

        let total: f64 = others.iter().map(|e| f64::from(e.level().get())).sum();
        let mean = total / others.len() as f64;
        let gap = (f64::from(level.get()) - mean).abs();
        let steps = gap / f64::from(tolerance.max(1));
        let estimate_ms = SHORT_WAIT_MS as f64 * (1.0 + steps);
        TimeDelta::milliseconds(estimate_ms.min(max_wait.num_milliseconds() as f64) as i64)
    }
}

/// Concurrent-safe registry of waiting players.
///
/// Cloning yields another handle to the same queue. Every operation runs
/// under one lock, so two concurrent match attempts can never both claim
/// the same candidate.
#[derive(Debug, Clone)]
pub struct MatchmakingQueue {
    config: MatchmakingConfig,
    state: Arc<Mutex<QueueState>>,
}

impl MatchmakingQueue {
    /// Creates an empty queue.
    #[instrument(skip(config))]
    pub fn new(config: MatchmakingConfig) -> Self {
        info!(
            level_tolerance = config.level_tolerance(),
            max_wait_ms = config.max_wait_ms(),
            "Creating matchmaking queue"
        );
        let limiter = RateLimiter::new(*config.rate_limit_actions(), config.rate_limit_window());
        Self {
            config,
            state: Arc::new(Mutex::new(QueueState {
                entries: HashMap::new(),
                limiter,
                next_sequence: 0,
                matches_made: 0,
                expired: 0,
            })),
        }
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self, options: MatchOptions) -> (u32, TimeDelta) {
        let tolerance = options
            .level_tolerance
            .unwrap_or(*self.config.level_tolerance())
            .max(1);
        let max_wait = options.max_wait.unwrap_or_else(|| self.config.max_wait());
        (tolerance, max_wait)
    }

    /// Validates and enrolls a player.
    ///
    /// # Errors
    ///
    /// Rejects malformed data, identities over the action limit, and
    /// identities that are already enrolled. A rejected call leaves the
    /// queue untouched.
    #[instrument(skip(self, request), fields(player_id = %request.id))]
    pub fn enroll(
        &self,
        request: EnrollRequest,
        now: DateTime<Utc>,
    ) -> Result<QueuePlacement, EnrollError> {
        let profile = PlayerProfile::try_from(request)?;
        let (tolerance, max_wait) = self.limits(MatchOptions::default());
        self.lock().enroll(profile, tolerance, max_wait, now)
    }

    /// Enrolls a player and tries to pair them without releasing the lock.
    ///
    /// Nobody else can claim the new entry between the two steps, so a
    /// returned placement with no match means the player is still waiting.
    ///
    /// # Errors
    ///
    /// Same as [`Self::enroll`].
    #[instrument(skip(self, request, options), fields(player_id = %request.id))]
    pub fn enroll_and_match(
        &self,
        request: EnrollRequest,
        options: MatchOptions,
        now: DateTime<Utc>,
    ) -> Result<(QueuePlacement, Option<MatchResult>), EnrollError> {
        let profile = PlayerProfile::try_from(request)?;
        let id = profile.id().clone();
        let (tolerance, max_wait) = self.limits(options);

        let mut state = self.lock();
        let placement = state.enroll(profile, tolerance, max_wait, now)?;
        let matched = match state.take_match(&id, tolerance, max_wait, now) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(player_id = %id, error = %e, "Fresh entry vanished before matching");
                None
            }
        };
        Ok((placement, matched))
    }

    /// Removes a player. Returns whether an entry was removed.
    ///
    /// Withdrawal counts towards the action limit but is never refused.
    #[instrument(skip(self))]
    pub fn withdraw(&self, id: &PlayerId, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        state.limiter.record(id, now);
        let removed = state.entries.remove(id).is_some();
        if removed {
            info!(player_id = %id, "Player withdrew");
        } else {
            debug!(player_id = %id, "Withdraw for absent player");
        }
        removed
    }

    /// Tries to pair an enrolled player with the best acceptable opponent.
    ///
    /// Returns `Ok(None)` and leaves the player queued when nobody is
    /// acceptable. On success both players leave the queue.
    ///
    /// # Errors
    ///
    /// [`MatchError::NotEnrolled`] if `id` is not waiting.
    #[instrument(skip(self, options))]
    pub fn attempt_match(
        &self,
        id: &PlayerId,
        options: MatchOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchResult>, MatchError> {
        let (tolerance, max_wait) = self.limits(options);
        self.lock().take_match(id, tolerance, max_wait, now)
    }

    /// 1-based position by enqueue time, `None` if absent.
    #[instrument(skip(self))]
    pub fn queue_position(&self, id: &PlayerId) -> Option<usize> {
        self.lock().position(id)
    }

    /// Rough wait estimate for a player with this profile.
    ///
    /// Short if a level-compatible opponent is already waiting, otherwise
    /// grows with the distance from the queue's mean level, capped at the
    /// fairness window.
    #[instrument(skip(self, profile), fields(player_id = %profile.id()))]
    pub fn estimated_wait(&self, profile: &PlayerProfile) -> TimeDelta {
        self.lock().estimated_wait(
            profile,
            *self.config.level_tolerance(),
            self.config.max_wait(),
        )
    }

    /// Purges entries that have waited longer than `max_age`.
    ///
    /// Also forgets rate-limit history that has left its window.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self, max_age: TimeDelta, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|id, entry| {
            let keep = now - *entry.enqueued_at() <= max_age;
            if !keep {
                debug!(player_id = %id, "Expiring stale queue entry");
            }
            keep
        });
        let removed = before - state.entries.len();
        state.expired += removed as u64;
        let forgotten = state.limiter.prune(now);

        if removed > 0 {
            info!(removed, remaining = state.entries.len(), forgotten, "Swept expired entries");
        }
        removed
    }

    /// Whether the identity is waiting.
    pub fn contains(&self, id: &PlayerId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Number of waiting players.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waiting entries in queue order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.lock().ordered().into_iter().cloned().collect()
    }

    /// Queue counters.
    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            waiting: state.entries.len(),
            matches_made: state.matches_made,
            expired: state.expired,
        }
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(MatchmakingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn pid(id: &str) -> PlayerId {
        PlayerId::parse(id).unwrap()
    }

    #[test]
    fn test_duplicate_enrollment_rejected() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        let err = queue.enroll(request("a", 5), t0()).unwrap_err();
        assert_eq!(err, EnrollError::AlreadyEnrolled(pid("a")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_invalid_request_never_enters() {
        let queue = MatchmakingQueue::default();
        let err = queue.enroll(request("a", 0), t0()).unwrap_err();
        assert!(matches!(err, EnrollError::Invalid(ValidationError::LevelOutOfRange(0))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rate_limit_blocks_enroll_churn() {
        let config = MatchmakingConfig::default().with_rate_limit_actions(4);
        let queue = MatchmakingQueue::new(config);
        let id = pid("a");
        for _ in 0..2 {
            queue.enroll(request("a", 5), t0()).unwrap();
            assert!(queue.withdraw(&id, t0()));
        }
        let err = queue.enroll(request("a", 5), t0()).unwrap_err();
        assert!(matches!(err, EnrollError::RateLimited { .. }));
        assert!(!queue.contains(&id));

        let later = t0() + TimeDelta::seconds(61);
        assert!(queue.enroll(request("a", 5), later).is_ok());
    }

    #[test]
    fn test_enroll_and_match_pairs_in_one_step() {
        let queue = MatchmakingQueue::default();
        let (placement, matched) = queue
            .enroll_and_match(request("a", 5), MatchOptions::default(), t0())
            .unwrap();
        assert_eq!(*placement.position(), 1);
        assert!(matched.is_none());
        assert!(queue.contains(&pid("a")));

        let (placement, matched) = queue
            .enroll_and_match(request("b", 6), MatchOptions::default(), t0())
            .unwrap();
        assert_eq!(*placement.position(), 2);
        let matched = matched.unwrap();
        assert_eq!(matched.player_ids(), (&pid("b"), &pid("a")));
        assert!(queue.is_empty());
        assert_eq!(*queue.status().matches_made(), 1);
    }

    #[test]
    fn test_enroll_and_match_rejects_like_enroll() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        let err = queue
            .enroll_and_match(request("a", 5), MatchOptions::default(), t0())
            .unwrap_err();
        assert_eq!(err, EnrollError::AlreadyEnrolled(pid("a")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_concurrent_enroll_and_match_never_strands_players() {
        let queue = MatchmakingQueue::default();
        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let queue = queue.clone();
                    scope.spawn(move || {
                        let mut outcomes = Vec::new();
                        for i in 0..25 {
                            let id = format!("t{t}p{i}");
                            let options = MatchOptions::default();
                            let (_, matched) = queue
                                .enroll_and_match(request(&id, 40), options, t0())
                                .unwrap();
                            outcomes.push((pid(&id), matched));
                        }
                        outcomes
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let matched: Vec<_> = results.iter().filter_map(|(_, m)| m.as_ref()).collect();
        assert_eq!(matched.len(), 50);
        for (id, result) in &results {
            // An unmatched enrollment was claimed later by someone else's match.
            if result.is_none() {
                assert!(matched.iter().any(|m| m.second().id() == id));
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_withdraw_is_idempotent() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        assert!(queue.withdraw(&pid("a"), t0()));
        assert!(!queue.withdraw(&pid("a"), t0()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_attempt_match_requires_enrollment() {
        let queue = MatchmakingQueue::default();
        let err = queue
            .attempt_match(&pid("ghost"), MatchOptions::default(), t0())
            .unwrap_err();
        assert_eq!(err, MatchError::NotEnrolled(pid("ghost")));
    }

    #[test]
    fn test_best_score_wins_then_earliest() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("req", 10), t0()).unwrap();
        queue.enroll(request("far", 12), t0()).unwrap();
        queue.enroll(request("early", 11), t0()).unwrap();
        queue.enroll(request("late", 11), t0()).unwrap();

        let result = queue
            .attempt_match(&pid("req"), MatchOptions::default(), t0())
            .unwrap()
            .unwrap();
        assert_eq!(result.second().id(), &pid("early"));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(&pid("far")));
        assert!(queue.contains(&pid("late")));
    }

    #[test]
    fn test_no_acceptable_candidate_keeps_entry() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        queue.enroll(request("b", 20), t0()).unwrap();
        let result = queue
            .attempt_match(&pid("a"), MatchOptions::default(), t0())
            .unwrap();
        assert!(result.is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_options_override_tolerance() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        queue.enroll(request("b", 15), t0()).unwrap();
        let options = MatchOptions {
            level_tolerance: Some(10),
            max_wait: None,
        };
        let result = queue.attempt_match(&pid("a"), options, t0()).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_long_wait_relaxes_tolerance() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        queue
            .enroll(request("b", 9), t0() + TimeDelta::seconds(31))
            .unwrap();
        let now = t0() + TimeDelta::seconds(31);
        assert!(
            queue
                .attempt_match(&pid("b"), MatchOptions::default(), now)
                .unwrap()
                .is_none()
        );
        assert!(
            queue
                .attempt_match(&pid("a"), MatchOptions::default(), now)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_queue_position_by_enqueue_time() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("a", 5), t0()).unwrap();
        let placement = queue
            .enroll(request("b", 50), t0() + TimeDelta::seconds(1))
            .unwrap();
        assert_eq!(*placement.position(), 2);
        assert_eq!(queue.queue_position(&pid("a")), Some(1));
        assert_eq!(queue.queue_position(&pid("b")), Some(2));
        assert_eq!(queue.queue_position(&pid("c")), None);

        queue.withdraw(&pid("a"), t0());
        assert_eq!(queue.queue_position(&pid("b")), Some(1));
    }

    #[test]
    fn test_estimated_wait() {
        let queue = MatchmakingQueue::default();
        let newcomer = PlayerProfile::try_from(request("newcomer", 10)).unwrap();
        assert_eq!(queue.estimated_wait(&newcomer), TimeDelta::seconds(30));

        queue.enroll(request("near", 11), t0()).unwrap();
        assert_eq!(queue.estimated_wait(&newcomer), short_wait());

        queue.withdraw(&pid("near"), t0());
        queue.enroll(request("far", 14), t0()).unwrap();
        // Gap 4 at tolerance 2: 5s * (1 + 2).
        assert_eq!(queue.estimated_wait(&newcomer), TimeDelta::seconds(15));

        queue.enroll(request("farther", 90), t0()).unwrap();
        assert_eq!(queue.estimated_wait(&newcomer), TimeDelta::seconds(30));
    }

    #[test]
    fn test_sweep_expired() {
        let queue = MatchmakingQueue::default();
        queue.enroll(request("old", 5), t0()).unwrap();
        queue
            .enroll(request("new", 5), t0() + TimeDelta::minutes(4))
            .unwrap();
        let removed = queue.sweep_expired(TimeDelta::minutes(5), t0() + TimeDelta::minutes(6));
        assert_eq!(removed, 1);
        assert!(!queue.contains(&pid("old")));
        assert!(queue.contains(&pid("new")));
        assert_eq!(*queue.status().expired(), 1);
    }
}
