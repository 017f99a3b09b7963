//! Referral record query functions.

use fission_types::ReferralRecord;
use rusqlite::{Connection, ErrorCode, Row};

use crate::{not_found, DbError, Result};

const COLUMNS: &str = "uid, created_at, updated_at, referred_by_uid, bonus_condition,
     bonus_direction, bonus_type, level, is_integrated_purchase_service";

/// A stored referral record whose change has not been applied yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAccrual {
    pub event_id: String,
    pub record: ReferralRecord,
}

/// Insert a record unless one already exists for its uid, and mark its
/// change `event_id` as awaiting accrual in the same transaction.
///
/// Returns [`DbError::AlreadyExists`] and leaves the stored record untouched
/// when the uid is taken.
pub fn create(conn: &Connection, record: &ReferralRecord, event_id: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO referral_records (uid, created_at, updated_at, referred_by_uid,
             bonus_condition, bonus_direction, bonus_type, level, is_integrated_purchase_service)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.uid,
            record.created_at,
            record.updated_at,
            record.referred_by_uid,
            record.bonus_condition,
            record.bonus_direction,
            record.bonus_type,
            record.level,
            record.is_integrated_purchase_service,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
            DbError::AlreadyExists(format!("referral record '{}'", record.uid))
        }
        other => DbError::Sqlite(other),
    })?;
    tx.execute(
        "INSERT INTO pending_accruals (event_id, uid, queued_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![event_id, record.uid, record.created_at],
    )?;
    tx.commit()?;
    Ok(())
}

/// Get the record for a uid.
pub fn get(conn: &Connection, uid: &str) -> Result<ReferralRecord> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM referral_records WHERE uid = ?1"),
        [uid],
        from_row,
    )
    .map_err(not_found(format!("referral record '{uid}'")))
}

/// Oldest records still awaiting accrual, at most `limit`.
pub fn pending(conn: &Connection, limit: u32) -> Result<Vec<PendingAccrual>> {
    let mut stmt = conn.prepare(
        "SELECT p.event_id, r.uid, r.created_at, r.updated_at, r.referred_by_uid,
             r.bonus_condition, r.bonus_direction, r.bonus_type, r.level,
             r.is_integrated_purchase_service
         FROM pending_accruals p
         JOIN referral_records r ON r.uid = p.uid
         ORDER BY p.queued_at, p.event_id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(PendingAccrual {
                event_id: row.get(0)?,
                record: from_row_at(row, 1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop a pending marker without applying it. Returns whether one existed.
pub fn discard_pending(conn: &Connection, event_id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM pending_accruals WHERE event_id = ?1", [event_id])?;
    Ok(removed > 0)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ReferralRecord> {
    from_row_at(row, 0)
}

fn from_row_at(row: &Row<'_>, at: usize) -> rusqlite::Result<ReferralRecord> {
    Ok(ReferralRecord {
        uid: row.get(at)?,
        created_at: row.get(at + 1)?,
        updated_at: row.get(at + 2)?,
        referred_by_uid: row.get(at + 3)?,
        bonus_condition: row.get(at + 4)?,
        bonus_direction: row.get(at + 5)?,
        bonus_type: row.get(at + 6)?,
        level: row.get(at + 7)?,
        is_integrated_purchase_service: row.get(at + 8)?,
    })
}
