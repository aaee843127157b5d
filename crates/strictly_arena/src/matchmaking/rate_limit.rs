//! Rolling-window limiter for queue actions.

use crate::PlayerId;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Per-identity sliding window of action timestamps.
#[derive(Debug, Clone)]
pub(crate) struct RateLimiter {
    limit: usize,
    window: TimeDelta,
    actions: HashMap<PlayerId, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub(crate) fn new(limit: usize, window: TimeDelta) -> Self {
        Self {
            limit: limit.max(1),
            window,
            actions: HashMap::new(),
        }
    }

    /// Records an action unless the identity is over its limit.
    ///
    /// On rejection returns how long until the oldest action leaves the
    /// window.
    pub(crate) fn try_acquire(
        &mut self,
        id: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<(), TimeDelta> {
        let window = self.window;
        let limit = self.limit;
        let history = self.actions.entry(id.clone()).or_default();
        Self::evict(history, window, now);

        if history.len() >= limit {
            let retry_after = history
                .front()
                .map(|oldest| *oldest + window - now)
                .unwrap_or_else(TimeDelta::zero);
            debug!(player_id = %id, actions = history.len(), "Rate limit reached");
            return Err(retry_after);
        }

        history.push_back(now);
        Ok(())
    }

    /// Records an action without enforcing the limit.
    ///
    /// Only the newest `limit` timestamps are kept. Older ones could never
    /// change a later decision.
    pub(crate) fn record(&mut self, id: &PlayerId, now: DateTime<Utc>) {
        let history = self.actions.entry(id.clone()).or_default();
        Self::evict(history, self.window, now);
        history.push_back(now);
        while history.len() > self.limit {
            history.pop_front();
        }
    }

    /// Drops identities with no action inside the window.
    pub(crate) fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        let before = self.actions.len();
        self.actions.retain(|_, history| {
            Self::evict(history, window, now);
            !history.is_empty()
        });
        before - self.actions.len()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.actions.len()
    }

    fn evict(history: &mut VecDeque<DateTime<Utc>>, window: TimeDelta, now: DateTime<Utc>) {
        while history.front().is_some_and(|at| now - *at >= window) {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_limit_enforced_within_window() {
        let mut limiter = RateLimiter::new(3, TimeDelta::seconds(60));
        let id = PlayerId::parse("p1").unwrap();
        for i in 0..3 {
            assert!(limiter.try_acquire(&id, t0() + TimeDelta::seconds(i)).is_ok());
        }
        let retry = limiter
            .try_acquire(&id, t0() + TimeDelta::seconds(10))
            .unwrap_err();
        assert_eq!(retry, TimeDelta::seconds(50));
    }

    #[test]
    fn test_window_rolls_forward() {
        let mut limiter = RateLimiter::new(2, TimeDelta::seconds(60));
        let id = PlayerId::parse("p1").unwrap();
        limiter.try_acquire(&id, t0()).unwrap();
        limiter.try_acquire(&id, t0() + TimeDelta::seconds(30)).unwrap();
        assert!(limiter.try_acquire(&id, t0() + TimeDelta::seconds(59)).is_err());
        assert!(limiter.try_acquire(&id, t0() + TimeDelta::seconds(60)).is_ok());
    }

    #[test]
    fn test_identities_are_independent() {
        let mut limiter = RateLimiter::new(1, TimeDelta::seconds(60));
        let a = PlayerId::parse("a").unwrap();
        let b = PlayerId::parse("b").unwrap();
        limiter.try_acquire(&a, t0()).unwrap();
        assert!(limiter.try_acquire(&a, t0()).is_err());
        assert!(limiter.try_acquire(&b, t0()).is_ok());
    }

    #[test]
    fn test_recorded_actions_count_and_prune() {
        let mut limiter = RateLimiter::new(2, TimeDelta::seconds(60));
        let id = PlayerId::parse("p1").unwrap();
        limiter.record(&id, t0());
        limiter.record(&id, t0());
        assert!(limiter.try_acquire(&id, t0()).is_err());
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.prune(t0() + TimeDelta::minutes(2)), 1);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_unchecked_actions_stay_bounded() {
        let mut limiter = RateLimiter::new(3, TimeDelta::seconds(60));
        let id = PlayerId::parse("p1").unwrap();
        for i in 0..1_000 {
            limiter.record(&id, t0() + TimeDelta::milliseconds(i));
        }
        assert_eq!(limiter.actions[&id].len(), 3);

        // The newest three decide when the next action frees up.
        let now = t0() + TimeDelta::seconds(1);
        let retry = limiter.try_acquire(&id, now).unwrap_err();
        assert_eq!(retry, t0() + TimeDelta::milliseconds(997) + TimeDelta::seconds(60) - now);
        assert!(limiter.try_acquire(&id, now + retry).is_ok());
    }
}
