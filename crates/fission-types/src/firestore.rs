//! Decoding of Firestore-style document change events.
//!
//! Firestore triggers deliver each field wrapped in a typed value
//! (`{"integerValue": "3"}`, `{"stringValue": "u1"}`, ...), with 64-bit
//! integers encoded as strings.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::referral::{ReferralChange, ReferralRecord};
use crate::{Result, TypesError, REFERRAL_RECORDS_COLLECTION};

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegerValue {
    #[serde_as(as = "DisplayFromStr")]
    integer_value: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StringValue {
    string_value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BooleanValue {
    boolean_value: bool,
}

/// Typed fields of a referral record document.
#[derive(Clone, Debug, Default, Deserialize)]
struct RecordFields {
    #[serde(default, alias = "createdAt")]
    created_at: Option<IntegerValue>,
    #[serde(default, alias = "updatedAt")]
    updated_at: Option<IntegerValue>,
    #[serde(default)]
    uid: Option<StringValue>,
    #[serde(default)]
    referred_by_uid: Option<StringValue>,
    #[serde(default)]
    bonus_condition: Option<IntegerValue>,
    #[serde(default)]
    bonus_direction: Option<IntegerValue>,
    #[serde(default)]
    bonus_type: Option<IntegerValue>,
    #[serde(default)]
    level: Option<IntegerValue>,
    #[serde(default)]
    is_integrated_purchase_service: Option<BooleanValue>,
}

/// One side of a Firestore change event.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FirestoreValue {
    /// Full resource name, `projects/.../documents/<collection>/<doc>`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    fields: RecordFields,
}

/// A Firestore document change event.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirestoreEvent {
    #[serde(default)]
    pub old_value: Option<FirestoreValue>,
    pub value: FirestoreValue,
}

/// Split a resource name into `(collection, document)`.
pub fn document_path(name: &str) -> Option<(&str, &str)> {
    let (_, path) = name.split_once("/documents/")?;
    let (collection, doc) = path.split_once('/')?;
    if collection.is_empty() || doc.is_empty() {
        return None;
    }
    Some((collection, doc))
}

impl FirestoreValue {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.fields.uid.is_none() && self.fields.bonus_type.is_none()
    }

    /// Decode into a referral record.
    ///
    /// The uid falls back to the document id when the field is absent.
    pub fn to_record(&self) -> Result<ReferralRecord> {
        let doc_id = if self.name.is_empty() {
            None
        } else {
            let (collection, doc) = document_path(&self.name).ok_or_else(|| {
                TypesError::MalformedEvent(format!("bad document name {:?}", self.name))
            })?;
            if collection != REFERRAL_RECORDS_COLLECTION {
                return Err(TypesError::MalformedEvent(format!(
                    "unexpected collection {collection:?}"
                )));
            }
            Some(doc)
        };

        let f = &self.fields;
        let uid = match (&f.uid, doc_id) {
            (Some(v), _) if !v.string_value.is_empty() => v.string_value.clone(),
            (_, Some(doc)) => doc.to_string(),
            _ => return Err(TypesError::MalformedEvent("missing uid".into())),
        };
        let int = |v: &Option<IntegerValue>| v.as_ref().map_or(0, |v| v.integer_value);

        Ok(ReferralRecord {
            created_at: int(&f.created_at),
            updated_at: int(&f.updated_at),
            uid,
            referred_by_uid: f
                .referred_by_uid
                .as_ref()
                .map(|v| v.string_value.clone())
                .unwrap_or_default(),
            bonus_condition: int(&f.bonus_condition),
            bonus_direction: int(&f.bonus_direction),
            bonus_type: int(&f.bonus_type),
            level: int(&f.level),
            is_integrated_purchase_service: f
                .is_integrated_purchase_service
                .as_ref()
                .is_some_and(|v| v.boolean_value),
        })
    }
}

impl FirestoreEvent {
    /// Convert into the plain change representation.
    pub fn into_change(self) -> Result<ReferralChange> {
        let old_value = match self.old_value {
            Some(old) if !old.is_empty() => Some(old.to_record()?),
            _ => None,
        };
        Ok(ReferralChange {
            old_value,
            value: self.value.to_record()?,
        })
    }
}

/// Change event body in either accepted encoding.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ChangeEventPayload {
    Plain(ReferralChange),
    Firestore(FirestoreEvent),
}

impl ChangeEventPayload {
    pub fn into_change(self) -> Result<ReferralChange> {
        match self {
            Self::Plain(change) => Ok(change),
            Self::Firestore(event) => event.into_change(),
        }
    }
}
