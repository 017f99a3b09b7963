//! # fission-types
//!
//! Shared domain types for the referral bonus ledger: the bonus taxonomies,
//! referral records, bonus history documents and change events.

pub mod bonus;
pub mod firestore;
pub mod history;
pub mod referral;

pub use bonus::{BonusCondition, BonusDirection, BonusType};
pub use history::{BonusHistory, BonusItem};
pub use referral::{IntakeRequest, ReferralChange, ReferralRecord, ValidatedIntake};

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Collection holding one referral record per uid.
pub const REFERRAL_RECORDS_COLLECTION: &str = "referral_records";

/// Collection holding one bonus history document per uid.
pub const BONUS_HISTORY_COLLECTION: &str = "bonus_history";

/// Errors raised while validating or decoding domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    #[error("invalid bonus type: {0}")]
    InvalidBonusType(String),

    #[error("invalid bonus direction: {0}")]
    InvalidBonusDirection(String),

    #[error("invalid bonus condition: {0}")]
    InvalidBonusCondition(String),

    #[error("conflicting bonus configuration: {0}")]
    Conflict(String),

    #[error("malformed change event: {0}")]
    MalformedEvent(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        // 2023-11-14, well before any plausible test run
        assert!(unix_now() > 1_700_000_000);
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(REFERRAL_RECORDS_COLLECTION, "referral_records");
        assert_eq!(BONUS_HISTORY_COLLECTION, "bonus_history");
    }
}
