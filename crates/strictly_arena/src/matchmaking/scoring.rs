//! Match quality scoring and acceptance.
//!
//! A pairing scores up to 0.5 for level closeness, 0.3 for time already spent
//! waiting and 0.2 for rating closeness. Scores rank candidates; acceptance is
//! a separate, level-only gate.

use super::QueueEntry;
use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::instrument;

const LEVEL_WEIGHT: f64 = 0.5;
const WAIT_WEIGHT: f64 = 0.3;
const RATING_WEIGHT: f64 = 0.2;
const RATING_SPAN: f64 = 500.0;

/// Breakdown of a pairing's quality.
#[derive(Debug, Clone, Copy, PartialEq, Getters, Serialize, Deserialize)]
pub struct MatchScore {
    level: f64,
    wait: f64,
    rating: f64,
    total: f64,
}

/// Scores `candidate` as an opponent for `requester`.
///
/// `tolerance` must be positive; `max_wait` is the wait at which the wait
/// component saturates.
#[instrument(
    skip(requester, candidate),
    fields(requester = %requester.id(), candidate = %candidate.id())
)]
pub fn score_pair(
    requester: &QueueEntry,
    candidate: &QueueEntry,
    tolerance: u32,
    max_wait: TimeDelta,
    now: DateTime<Utc>,
) -> MatchScore {
    let gap = f64::from(requester.level().gap(candidate.level()));
    let level = (LEVEL_WEIGHT - (gap / f64::from(tolerance.max(1))) * LEVEL_WEIGHT).max(0.0);

    let avg_wait_ms = (waited_ms(requester, now) + waited_ms(candidate, now)) / 2.0;
    let max_wait_ms = (max_wait.num_milliseconds() as f64).max(1.0);
    let wait = ((avg_wait_ms / max_wait_ms) * WAIT_WEIGHT).min(WAIT_WEIGHT);

    let rating = match (requester.rating(), candidate.rating()) {
        (Some(a), Some(b)) => {
            let gap = f64::from(a.gap(b));
            (RATING_WEIGHT - (gap / RATING_SPAN) * RATING_WEIGHT).max(0.0)
        }
        _ => 0.0,
    };

    MatchScore {
        level,
        wait,
        rating,
        total: (level + wait + rating).clamp(0.0, 1.0),
    }
}

/// Whether `candidate` is an acceptable opponent for `requester`.
///
/// The level gap must be within `tolerance`, doubled once the requester has
/// waited longer than `max_wait`. Only the requester's wait counts.
pub fn is_acceptable(
    requester: &QueueEntry,
    candidate: &QueueEntry,
    tolerance: u32,
    max_wait: TimeDelta,
    now: DateTime<Utc>,
) -> bool {
    let allowed = if now - *requester.enqueued_at() > max_wait {
        tolerance.saturating_mul(2)
    } else {
        tolerance
    };
    requester.level().gap(candidate.level()) <= allowed
}

fn waited_ms(entry: &QueueEntry, now: DateTime<Utc>) -> f64 {
    ((now - *entry.enqueued_at()).num_milliseconds().max(0)) as f64
}
