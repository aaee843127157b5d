//! Regenerating energy that gates entry into matchmaking.
//!
//! Energy is owned by the player-profile collaborator. This module only
//! derives the current level from a stored snapshot and computes the value
//! to persist after a game is paid for. Nothing here holds state, so nothing
//! here needs a lock.

use crate::EnergyConfig;
use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Largest energy value accepted from a collaborator.
pub const MAX_ENERGY_INPUT: i64 = 1_000_000;

/// Stored energy as reported by the profile collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct EnergySnapshot {
    current: i64,
    max: i64,
    last_update: DateTime<Utc>,
}

impl EnergySnapshot {
    /// Creates a snapshot. Values are checked when the snapshot is read.
    pub fn new(current: i64, max: i64, last_update: DateTime<Utc>) -> Self {
        Self {
            current,
            max,
            last_update,
        }
    }

    /// Creates a snapshot from a unix timestamp in milliseconds.
    ///
    /// Fails when the timestamp cannot be represented.
    #[instrument]
    pub fn from_unix_millis(current: i64, max: i64, millis: i64) -> Result<Self, EnergyError> {
        let last_update = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            warn!(millis, "Unrepresentable energy timestamp");
            EnergyError::Corrupted {
                reason: CorruptionReason::InvalidTimestamp,
                max,
            }
        })?;
        Ok(Self::new(current, max, last_update))
    }
}

/// Derived energy level at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct EnergyStatus {
    current: i64,
    max: i64,
    next_regen_at: Option<DateTime<Utc>>,
    time_until_next_regen: TimeDelta,
    can_play: bool,
}

impl EnergyStatus {
    /// Zeroed, ineligible status reported for a corrupted snapshot.
    pub fn depleted(max: i64) -> Self {
        Self {
            current: 0,
            max: max.clamp(0, MAX_ENERGY_INPUT),
            next_regen_at: None,
            time_until_next_regen: TimeDelta::zero(),
            can_play: false,
        }
    }
}

/// Why a snapshot was judged corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum CorruptionReason {
    /// Stored value below zero.
    #[display("negative current value")]
    NegativeCurrent,
    /// Capacity not positive or unreasonably large.
    #[display("invalid capacity")]
    InvalidCapacity,
    /// Stored value beyond anything the game can produce.
    #[display("current value out of range")]
    CurrentOutOfRange,
    /// Last update lies after the evaluation instant.
    #[display("last update is in the future")]
    FutureTimestamp,
    /// Timestamp could not be represented.
    #[display("invalid timestamp")]
    InvalidTimestamp,
}

/// Energy rejection.
#[derive(Debug, Clone, PartialEq, Eq, Display, derive_more::Error)]
pub enum EnergyError {
    /// Snapshot failed sanity checks.
    #[display("Corrupted energy snapshot: {}", reason)]
    Corrupted {
        /// What was wrong.
        reason: CorruptionReason,
        /// Capacity as reported, for the fallback status.
        max: i64,
    },
    /// Not enough energy for a game.
    #[display("Insufficient energy: have {}, need {}", current, cost)]
    Insufficient {
        /// Available energy.
        current: i64,
        /// Cost of one game.
        cost: i64,
    },
    /// Value passed to consume is negative or absurdly large.
    #[display("Invalid energy value: {}", _0)]
    InvalidInput(#[error(not(source))] i64),
}

impl EnergyError {
    /// Status to report in place of a real reading.
    pub fn fallback_status(&self) -> EnergyStatus {
        match self {
            EnergyError::Corrupted { max, .. } => EnergyStatus::depleted(*max),
            _ => EnergyStatus::depleted(0),
        }
    }
}

/// Regen rate and game cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct EnergyPolicy {
    regen_interval: TimeDelta,
    cost_per_game: i64,
}

impl EnergyPolicy {
    /// Creates a policy. Non-positive values are raised to the minimum.
    pub fn new(regen_interval: TimeDelta, cost_per_game: i64) -> Self {
        Self {
            regen_interval: regen_interval.max(TimeDelta::milliseconds(1)),
            cost_per_game: cost_per_game.max(1),
        }
    }

    /// Creates a policy from configuration.
    pub fn from_config(config: &EnergyConfig) -> Self {
        Self::new(config.regen_interval(), *config.cost_per_game())
    }

    /// Computes the energy level at `now`.
    ///
    /// One unit regenerates per elapsed interval since the last update,
    /// capped at capacity.
    ///
    /// # Errors
    ///
    /// Returns [`EnergyError::Corrupted`] for a negative or out-of-range
    /// value, an invalid capacity, or a last update after `now`. Use
    /// [`EnergyError::fallback_status`] for the zeroed reading.
    #[instrument(skip(self))]
    pub fn current_level(
        &self,
        snapshot: &EnergySnapshot,
        now: DateTime<Utc>,
    ) -> Result<EnergyStatus, EnergyError> {
        self.check(snapshot, now)?;

        let max = snapshot.max;
        let stored = snapshot.current.min(max);
        let intervals = self.intervals_elapsed(snapshot, now);
        let current = stored.saturating_add(intervals).min(max);

        let next_regen_at = if current >= max {
            None
        } else {
            i32::try_from(intervals + 1)
                .ok()
                .and_then(|n| self.regen_interval.checked_mul(n))
                .and_then(|delta| snapshot.last_update.checked_add_signed(delta))
        };
        let time_until_next_regen = next_regen_at
            .map(|at| at - now)
            .unwrap_or_else(TimeDelta::zero);

        let status = EnergyStatus {
            current,
            max,
            next_regen_at,
            time_until_next_regen,
            can_play: current >= self.cost_per_game,
        };
        debug!(
            stored = snapshot.current,
            intervals,
            current,
            can_play = status.can_play,
            "Computed energy level"
        );
        Ok(status)
    }

    /// Returns the energy left after paying for one game.
    ///
    /// # Errors
    ///
    /// Fails when `current` is negative, above [`MAX_ENERGY_INPUT`], or
    /// below the cost of a game.
    #[instrument(skip(self))]
    pub fn consume(&self, current: i64) -> Result<i64, EnergyError> {
        if !(0..=MAX_ENERGY_INPUT).contains(&current) {
            warn!(current, "Rejected forged energy value");
            return Err(EnergyError::InvalidInput(current));
        }
        if current < self.cost_per_game {
            debug!(current, cost = self.cost_per_game, "Not enough energy");
            return Err(EnergyError::Insufficient {
                current,
                cost: self.cost_per_game,
            });
        }
        Ok((current - self.cost_per_game).max(0))
    }

    /// Pays for one game and returns the snapshot to persist.
    ///
    /// Partial progress towards the next unit is kept, so reading the
    /// returned snapshot at `now` gives exactly one cost less than before.
    #[instrument(skip(self))]
    pub fn consume_at(
        &self,
        snapshot: &EnergySnapshot,
        now: DateTime<Utc>,
    ) -> Result<EnergySnapshot, EnergyError> {
        let status = self.current_level(snapshot, now)?;
        let remaining = self.consume(status.current)?;

        let intervals = self.intervals_elapsed(snapshot, now);
        let last_update = if status.current >= snapshot.max {
            now
        } else {
            i32::try_from(intervals)
                .ok()
                .and_then(|n| self.regen_interval.checked_mul(n))
                .and_then(|delta| snapshot.last_update.checked_add_signed(delta))
                .unwrap_or(now)
        };

        Ok(EnergySnapshot::new(remaining, snapshot.max, last_update))
    }

    fn check(&self, snapshot: &EnergySnapshot, now: DateTime<Utc>) -> Result<(), EnergyError> {
        let reason = if snapshot.current < 0 {
            Some(CorruptionReason::NegativeCurrent)
        } else if snapshot.max <= 0 || snapshot.max > MAX_ENERGY_INPUT {
            Some(CorruptionReason::InvalidCapacity)
        } else if snapshot.current > MAX_ENERGY_INPUT {
            Some(CorruptionReason::CurrentOutOfRange)
        } else if snapshot.last_update > now {
            Some(CorruptionReason::FutureTimestamp)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!(
                    %reason,
                    current = snapshot.current,
                    max = snapshot.max,
                    "Corrupted energy snapshot"
                );
                Err(EnergyError::Corrupted {
                    reason,
                    max: snapshot.max,
                })
            }
            None => Ok(()),
        }
    }

    fn intervals_elapsed(&self, snapshot: &EnergySnapshot, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - snapshot.last_update).num_milliseconds().max(0);
        elapsed / self.regen_interval.num_milliseconds().max(1)
    }
}

impl Default for EnergyPolicy {
    fn default() -> Self {
        Self::from_config(&EnergyConfig::default())
    }
}
