//! Per-user bonus ledger.

use serde::{Deserialize, Serialize};

use crate::bonus::BonusType;

/// One accrual event. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct BonusItem {
    /// Timestamp of the referral event that triggered the accrual.
    pub referraled_at: i64,
    /// When the accrual was processed.
    pub started_at: i64,
    /// Bonus type code.
    pub bonus_type: i64,
    /// Granted duration in seconds.
    pub expire_time: i64,
}

impl BonusItem {
    pub fn new(kind: BonusType, referraled_at: i64, started_at: i64) -> Self {
        Self {
            referraled_at,
            started_at,
            bonus_type: kind.code(),
            expire_time: kind.seconds(),
        }
    }
}

/// Bonus history document, one per uid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct BonusHistory {
    pub created_at: i64,
    pub updated_at: i64,
    pub uid: String,
    /// Sum of every granted duration, in seconds.
    pub expired_at: i64,
    /// Accruals in the order they were applied.
    #[serde(default)]
    pub bonuses: Vec<BonusItem>,
}

impl BonusHistory {
    /// Apply one accrual to `previous` (or to an empty document when the uid
    /// has no history yet) and return the document to persist.
    ///
    /// Durations stack: each accrual extends the cumulative total rather
    /// than restarting from `now`.
    pub fn accrue(previous: Option<Self>, uid: &str, item: BonusItem, now: i64) -> Self {
        let mut doc = match previous {
            Some(mut doc) => {
                doc.updated_at = now;
                doc.expired_at = doc.expired_at.saturating_add(item.expire_time);
                doc
            }
            None => Self {
                created_at: now,
                updated_at: now,
                uid: uid.to_string(),
                expired_at: item.expire_time,
                bonuses: Vec::new(),
            },
        };
        doc.bonuses.push(item);
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_first_accrual_creates_document() {
        let item = BonusItem::new(BonusType::ThreeDay, NOW - 10, NOW);
        let doc = BonusHistory::accrue(None, "u1", item.clone(), NOW);

        assert_eq!(doc.uid, "u1");
        assert_eq!(doc.created_at, NOW);
        assert_eq!(doc.updated_at, NOW);
        assert_eq!(doc.expired_at, 259_200);
        assert_eq!(doc.bonuses, vec![item]);
    }

    #[test]
    fn test_accruals_stack_in_order() {
        let kinds = [BonusType::Daily, BonusType::Weekly, BonusType::Monthly];
        let mut doc = None;
        for (i, kind) in kinds.iter().enumerate() {
            let now = NOW + i as i64;
            let item = BonusItem::new(*kind, NOW, now);
            doc = Some(BonusHistory::accrue(doc, "u1", item, now));
        }
        let doc = doc.expect("document");

        assert_eq!(doc.expired_at, 86_400 + 604_800 + 2_592_000);
        assert_eq!(doc.created_at, NOW);
        assert_eq!(doc.updated_at, NOW + 2);
        let codes: Vec<i64> = doc.bonuses.iter().map(|b| b.bonus_type).collect();
        assert_eq!(codes, vec![1, 3, 4]);
    }

    #[test]
    fn test_existing_items_untouched() {
        let first = BonusItem::new(BonusType::Daily, 1, 2);
        let doc = BonusHistory::accrue(None, "u1", first.clone(), NOW);
        let doc = BonusHistory::accrue(
            Some(doc),
            "u1",
            BonusItem::new(BonusType::Yearly, 3, 4),
            NOW + 1,
        );
        assert_eq!(doc.bonuses[0], first);
        assert_eq!(doc.bonuses.len(), 2);
    }

    #[test]
    fn test_document_json_shape() {
        let doc = BonusHistory::accrue(None, "u1", BonusItem::new(BonusType::Daily, 5, 6), 6);
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json["expired_at"], 86_400);
        assert_eq!(json["bonuses"][0]["referraled_at"], 5);
        assert_eq!(json["bonuses"][0]["expire_time"], 86_400);
    }
}
