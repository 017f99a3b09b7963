//! Bonus taxonomies: duration classes, credit direction and award condition.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError, SECONDS_PER_DAY};

/// Closed set of bonus duration classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    Daily,
    ThreeDay,
    Weekly,
    Monthly,
    SixMonth,
    Yearly,
    Lifetime,
}

impl BonusType {
    /// Every duration class, ordered by code.
    pub const ALL: [BonusType; 7] = [
        BonusType::Daily,
        BonusType::ThreeDay,
        BonusType::Weekly,
        BonusType::Monthly,
        BonusType::SixMonth,
        BonusType::Yearly,
        BonusType::Lifetime,
    ];

    /// Decode a wire code (1-7).
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Daily),
            2 => Ok(Self::ThreeDay),
            3 => Ok(Self::Weekly),
            4 => Ok(Self::Monthly),
            5 => Ok(Self::SixMonth),
            6 => Ok(Self::Yearly),
            7 => Ok(Self::Lifetime),
            other => Err(TypesError::InvalidBonusType(other.to_string())),
        }
    }

    /// Decode a duration-class name such as `"three_day"`.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| TypesError::InvalidBonusType(name.to_string()))
    }

    /// Wire code.
    pub fn code(self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::ThreeDay => 2,
            Self::Weekly => 3,
            Self::Monthly => 4,
            Self::SixMonth => 5,
            Self::Yearly => 6,
            Self::Lifetime => 7,
        }
    }

    /// Duration-class name sent to the entitlement service.
    pub fn name(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::ThreeDay => "three_day",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::SixMonth => "six_month",
            Self::Yearly => "yearly",
            Self::Lifetime => "lifetime",
        }
    }

    /// Granted duration in seconds.
    ///
    /// Months are 30 days and "lifetime" is ten 365-day years.
    pub fn seconds(self) -> i64 {
        match self {
            Self::Daily => SECONDS_PER_DAY,
            Self::ThreeDay => SECONDS_PER_DAY * 3,
            Self::Weekly => SECONDS_PER_DAY * 7,
            Self::Monthly => SECONDS_PER_DAY * 30,
            Self::SixMonth => SECONDS_PER_DAY * 30 * 6,
            Self::Yearly => SECONDS_PER_DAY * 365,
            Self::Lifetime => SECONDS_PER_DAY * 365 * 10,
        }
    }
}

/// Which side of a referral receives the bonus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusDirection {
    /// Credit only the acting user.
    Uid,
    /// Credit only the referring user.
    ReferredBy,
    /// Credit both users.
    #[default]
    Both,
}

impl BonusDirection {
    /// Decode a wire code strictly (1-3).
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Uid),
            2 => Ok(Self::ReferredBy),
            3 => Ok(Self::Both),
            other => Err(TypesError::InvalidBonusDirection(other.to_string())),
        }
    }

    /// Decode a wire code, treating anything unrecognized as [`BonusDirection::Both`].
    pub fn from_code_lenient(code: i64) -> Self {
        Self::from_code(code).unwrap_or_default()
    }

    /// Wire code.
    pub fn code(self) -> i64 {
        match self {
            Self::Uid => 1,
            Self::ReferredBy => 2,
            Self::Both => 3,
        }
    }

    /// Whether the acting user is credited.
    pub fn credits_uid(self) -> bool {
        matches!(self, Self::Uid | Self::Both)
    }

    /// Whether the referring user is credited.
    pub fn credits_referrer(self) -> bool {
        matches!(self, Self::ReferredBy | Self::Both)
    }
}

/// When a bonus becomes due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusCondition {
    #[default]
    Immediately,
    OnTime,
}

impl BonusCondition {
    /// Decode a wire code (1-2).
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Immediately),
            2 => Ok(Self::OnTime),
            other => Err(TypesError::InvalidBonusCondition(other.to_string())),
        }
    }

    /// Wire code.
    pub fn code(self) -> i64 {
        match self {
            Self::Immediately => 1,
            Self::OnTime => 2,
        }
    }
}

/// Decode the deprecated composite `"<direction>_<type>"` form.
///
/// The type part may be a code (`"3_2"`) or a duration-class name
/// (`"1_three_day"`).
pub fn parse_composite(value: &str) -> Result<(BonusDirection, BonusType)> {
    let (direction, kind) = value
        .split_once('_')
        .ok_or_else(|| TypesError::InvalidBonusType(value.to_string()))?;

    let direction = direction
        .parse::<i64>()
        .map_err(|_| TypesError::InvalidBonusDirection(direction.to_string()))
        .and_then(BonusDirection::from_code)?;

    let kind = match kind.parse::<i64>() {
        Ok(code) => BonusType::from_code(code)?,
        Err(_) => BonusType::from_name(kind)?,
    };

    Ok((direction, kind))
}
