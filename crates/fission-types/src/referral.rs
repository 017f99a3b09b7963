//! Referral records, the intake payload and record change events.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bonus::{self, BonusCondition, BonusDirection, BonusType};
use crate::{Result, TypesError};

/// The one-time declaration of who referred a user and on what terms.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct ReferralRecord {
    pub created_at: i64,
    pub updated_at: i64,
    pub uid: String,
    /// Empty for organic users.
    #[serde(default)]
    pub referred_by_uid: String,
    pub bonus_condition: i64,
    pub bonus_direction: i64,
    pub bonus_type: i64,
    /// Reserved.
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub is_integrated_purchase_service: bool,
}

impl ReferralRecord {
    /// Build a fresh record for `uid` from a validated intake payload.
    pub fn new(uid: &str, intake: &ValidatedIntake, now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            uid: uid.to_string(),
            referred_by_uid: intake.referred_by_uid.clone(),
            bonus_condition: intake.condition.code(),
            bonus_direction: intake.direction.code(),
            bonus_type: intake.kind.code(),
            level: 0,
            is_integrated_purchase_service: intake.integrated,
        }
    }

    /// Decoded bonus type.
    pub fn bonus_type(&self) -> Result<BonusType> {
        BonusType::from_code(self.bonus_type)
    }

    /// Decoded direction; unknown codes credit both sides.
    pub fn direction(&self) -> BonusDirection {
        BonusDirection::from_code_lenient(self.bonus_direction)
    }

    /// Decoded condition; unknown codes are treated as immediate.
    pub fn condition(&self) -> BonusCondition {
        BonusCondition::from_code(self.bonus_condition).unwrap_or_default()
    }
}

/// `bonus_type` as it arrives on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BonusTypeField {
    /// Canonical integer code.
    Code(i64),
    /// Deprecated `"<direction>_<type>"` composite.
    Composite(String),
}

/// JSON body accepted by referral intake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRequest {
    #[serde(default)]
    pub referred_by_uid: String,
    #[serde(default)]
    pub bonus_condition: Option<i64>,
    #[serde(default)]
    pub bonus_direction: Option<i64>,
    pub bonus_type: BonusTypeField,
    #[serde(default)]
    pub is_integrated_purchase_service: bool,
}

/// An intake payload whose codes all fall inside the taxonomies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedIntake {
    pub referred_by_uid: String,
    pub condition: BonusCondition,
    pub direction: BonusDirection,
    pub kind: BonusType,
    pub integrated: bool,
    /// Decoded from the deprecated composite form.
    pub legacy: bool,
}

impl IntakeRequest {
    /// Check every code against its taxonomy.
    ///
    /// Missing condition and direction default to immediate and both.
    pub fn validate(&self) -> Result<ValidatedIntake> {
        let condition = match self.bonus_condition {
            Some(code) => BonusCondition::from_code(code)?,
            None => BonusCondition::default(),
        };
        let explicit_direction = self
            .bonus_direction
            .map(BonusDirection::from_code)
            .transpose()?;

        let (direction, kind, legacy) = match &self.bonus_type {
            BonusTypeField::Code(code) => (
                explicit_direction.unwrap_or_default(),
                BonusType::from_code(*code)?,
                false,
            ),
            BonusTypeField::Composite(composite) => {
                let (direction, kind) = bonus::parse_composite(composite)?;
                if let Some(explicit) = explicit_direction {
                    if explicit != direction {
                        return Err(TypesError::Conflict(format!(
                            "bonus_direction {} disagrees with bonus_type {composite:?}",
                            explicit.code()
                        )));
                    }
                }
                warn!(bonus_type = %composite, "composite bonus_type is deprecated");
                (direction, kind, true)
            }
        };

        Ok(ValidatedIntake {
            referred_by_uid: self.referred_by_uid.clone(),
            condition,
            direction,
            kind,
            integrated: self.is_integrated_purchase_service,
            legacy,
        })
    }
}

/// Prior and current state of a changed referral record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralChange {
    #[serde(default)]
    pub old_value: Option<ReferralRecord>,
    pub value: ReferralRecord,
}

impl ReferralChange {
    /// Change emitted when a record is first written.
    pub fn created(record: ReferralRecord) -> Self {
        Self {
            old_value: None,
            value: record,
        }
    }

    /// Timestamp recorded on each credited bonus item.
    pub fn event_timestamp(&self) -> i64 {
        self.value.created_at
    }

    /// Deduplication key for this change.
    pub fn event_id(&self) -> String {
        format!(
            "{}/{}@{}",
            crate::REFERRAL_RECORDS_COLLECTION,
            self.value.uid,
            self.value.updated_at
        )
    }
}
