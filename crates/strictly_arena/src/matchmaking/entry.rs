//! Queue entries and boundary validation.
//!
//! [`EnrollRequest`] is what a collaborator hands over. It is validated once
//! into a [`PlayerProfile`]; everything past this module assumes valid data.

use crate::PlayerId;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_new::new;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Lowest accepted level.
pub const MIN_LEVEL: i64 = 1;
/// Highest accepted level.
pub const MAX_LEVEL: i64 = 100;
/// Highest accepted rating.
pub const MAX_RATING: i64 = 3000;
/// Accepted display name length, in characters.
pub const DISPLAY_NAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
/// Longest accepted connection handle.
pub const MAX_CONNECTION_LEN: usize = 256;

/// Malformed player data.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ValidationError {
    /// Identity is blank.
    #[display("Player id must not be empty")]
    EmptyId,
    /// Identity is too long.
    #[display("Player id is {} bytes, limit is 64", _0)]
    IdTooLong(#[error(not(source))] usize),
    /// Display name has the wrong length.
    #[display("Display name must be 3-20 characters, got {}", _0)]
    DisplayNameLength(#[error(not(source))] usize),
    /// Display name contains something other than letters, digits, `_` or `-`.
    #[display("Display name may only contain letters, digits, '_' and '-'")]
    DisplayNameCharacters,
    /// Level outside 1..=100.
    #[display("Level {} is outside 1-100", _0)]
    LevelOutOfRange(#[error(not(source))] i64),
    /// Rating outside 0..=3000.
    #[display("Rating {} is outside 0-3000", _0)]
    RatingOutOfRange(#[error(not(source))] i64),
    /// Connection handle missing or oversized.
    #[display("Connection handle must be 1-256 bytes")]
    InvalidConnection,
}

/// Validated display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Validates a raw display name.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let len = raw.chars().count();
        if !DISPLAY_NAME_LEN.contains(&len) {
            return Err(ValidationError::DisplayNameLength(len));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ValidationError::DisplayNameCharacters);
        }
        Ok(Self(raw))
    }

    /// Borrows the name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DisplayName> for String {
    fn from(name: DisplayName) -> Self {
        name.0
    }
}

/// Player level, 1..=100.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Level(u8);

impl Level {
    /// Validates a raw level.
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        if (MIN_LEVEL..=MAX_LEVEL).contains(&raw) {
            Ok(Self(raw as u8))
        } else {
            Err(ValidationError::LevelOutOfRange(raw))
        }
    }

    /// Level as an integer.
    pub fn get(self) -> u32 {
        u32::from(self.0)
    }

    /// Absolute difference between two levels.
    pub fn gap(self, other: Level) -> u32 {
        self.get().abs_diff(other.get())
    }
}

impl TryFrom<i64> for Level {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Level> for i64 {
    fn from(level: Level) -> Self {
        i64::from(level.0)
    }
}

/// Skill rating, 0..=3000.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rating(u16);

impl Rating {
    /// Validates a raw rating.
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        if (0..=MAX_RATING).contains(&raw) {
            Ok(Self(raw as u16))
        } else {
            Err(ValidationError::RatingOutOfRange(raw))
        }
    }

    /// Rating as an integer.
    pub fn get(self) -> u32 {
        u32::from(self.0)
    }

    /// Absolute difference between two ratings.
    pub fn gap(self, other: Rating) -> u32 {
        self.get().abs_diff(other.get())
    }
}

impl TryFrom<i64> for Rating {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        i64::from(rating.0)
    }
}

/// Untrusted enrollment input from the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct EnrollRequest {
    /// Raw identity.
    pub id: String,
    /// Raw display name.
    pub display_name: String,
    /// Raw level.
    pub level: i64,
    /// Raw rating, if the player has one.
    pub rating: Option<i64>,
    /// Opaque connection handle.
    pub connection: String,
}

/// Validated player data.
///
/// Only built through [`TryFrom<EnrollRequest>`], so it is serializable but
/// not deserializable.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct PlayerProfile {
    id: PlayerId,
    display_name: DisplayName,
    level: Level,
    rating: Option<Rating>,
    connection: String,
}

impl TryFrom<EnrollRequest> for PlayerProfile {
    type Error = ValidationError;

    #[instrument(skip(request), fields(player_id = %request.id))]
    fn try_from(request: EnrollRequest) -> Result<Self, Self::Error> {
        let validated = validate_request(request);

        if let Err(e) = &validated {
            warn!(error = %e, "Rejected malformed player data");
        }
        validated
    }
}

fn validate_request(request: EnrollRequest) -> Result<PlayerProfile, ValidationError> {
    let id = PlayerId::parse(request.id)?;
    let display_name = DisplayName::parse(request.display_name)?;
    let level = Level::new(request.level)?;
    let rating = request.rating.map(Rating::new).transpose()?;
    if request.connection.is_empty() || request.connection.len() > MAX_CONNECTION_LEN {
        return Err(ValidationError::InvalidConnection);
    }
    Ok(PlayerProfile {
        id,
        display_name,
        level,
        rating,
        connection: request.connection,
    })
}

/// A waiting player.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct QueueEntry {
    profile: PlayerProfile,
    enqueued_at: DateTime<Utc>,
    #[getter(skip)]
    sequence: u64,
}

impl QueueEntry {
    pub(crate) fn new(profile: PlayerProfile, enqueued_at: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            profile,
            enqueued_at,
            sequence,
        }
    }

    /// Shorthand for the player's identity.
    pub fn id(&self) -> &PlayerId {
        self.profile.id()
    }

    /// Shorthand for the player's level.
    pub fn level(&self) -> Level {
        *self.profile.level()
    }

    /// Shorthand for the player's rating.
    pub fn rating(&self) -> Option<Rating> {
        *self.profile.rating()
    }

    /// Ordering key: enqueue time, then insertion order.
    pub fn queue_order(&self) -> (DateTime<Utc>, u64) {
        (self.enqueued_at, self.sequence)
    }
}
