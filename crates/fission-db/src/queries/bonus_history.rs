//! Bonus history query functions and the transactional accrual.

use fission_types::{BonusHistory, BonusItem, BonusType};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::{queries::outbox, DbError, Result};

/// One user to credit as part of a change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credit {
    pub uid: String,
    pub kind: BonusType,
    /// Timestamp of the triggering referral event.
    pub referraled_at: i64,
    /// Queue an entitlement grant alongside the history write.
    pub integrated: bool,
}

/// Result of crediting one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditOutcome {
    pub uid: String,
    /// History document as committed.
    pub history: BonusHistory,
    /// Outbox row queued for the entitlement service, if any.
    pub outbox_id: Option<i64>,
}

/// Result of applying a change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccrualOutcome {
    Applied(Vec<CreditOutcome>),
    /// The event id was already processed; nothing was written.
    Duplicate,
}

/// Load the history document for `uid`, or `None` if the uid has none.
pub fn find(conn: &Connection, uid: &str) -> Result<Option<BonusHistory>> {
    let header = conn
        .query_row(
            "SELECT created_at, updated_at, expired_at FROM bonus_history WHERE uid = ?1",
            [uid],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;

    let Some((created_at, updated_at, expired_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT referraled_at, started_at, bonus_type, expire_time
         FROM bonus_items WHERE uid = ?1 ORDER BY seq",
    )?;
    let bonuses = stmt
        .query_map([uid], |row| {
            Ok(BonusItem {
                referraled_at: row.get(0)?,
                started_at: row.get(1)?,
                bonus_type: row.get(2)?,
                expire_time: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(BonusHistory {
        created_at,
        updated_at,
        uid: uid.to_string(),
        expired_at,
        bonuses,
    }))
}

/// Load the history document for `uid`, failing with [`DbError::NotFound`].
pub fn get(conn: &Connection, uid: &str) -> Result<BonusHistory> {
    find(conn, uid)?.ok_or_else(|| DbError::NotFound(format!("bonus history '{uid}'")))
}

/// Credit one user inside an open transaction.
///
/// A missing document is treated as empty. The header is rewritten in full
/// and the new item appended.
pub fn credit_user(tx: &Transaction<'_>, credit: &Credit, now: i64) -> Result<CreditOutcome> {
    let previous = find(tx, &credit.uid)?;
    let existed = previous.is_some();
    let item = BonusItem::new(credit.kind, credit.referraled_at, now);
    let history = BonusHistory::accrue(previous, &credit.uid, item.clone(), now);

    tx.execute(
        "INSERT INTO bonus_history (uid, created_at, updated_at, expired_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(uid) DO UPDATE SET
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             expired_at = excluded.expired_at",
        rusqlite::params![
            history.uid,
            history.created_at,
            history.updated_at,
            history.expired_at,
        ],
    )?;
    tx.execute(
        "INSERT INTO bonus_items (uid, referraled_at, started_at, bonus_type, expire_time)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            credit.uid,
            item.referraled_at,
            item.started_at,
            item.bonus_type,
            item.expire_time,
        ],
    )?;

    let outbox_id = if credit.integrated {
        Some(outbox::enqueue(tx, &credit.uid, credit.kind.name(), now)?)
    } else {
        None
    };

    debug!(
        uid = %credit.uid,
        existed,
        expired_at = history.expired_at,
        items = history.bonuses.len(),
        "bonus history updated"
    );

    Ok(CreditOutcome {
        uid: credit.uid.clone(),
        history,
        outbox_id,
    })
}

/// Apply every credit of one change event atomically.
///
/// When `event_id` is given its pending-accrual marker is cleared. If it was
/// already applied, nothing else is written and [`AccrualOutcome::Duplicate`]
/// is returned.
pub fn apply(
    conn: &mut Connection,
    event_id: Option<&str>,
    credits: &[Credit],
    now: i64,
) -> Result<AccrualOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(id) = event_id {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?1, ?2)",
            rusqlite::params![id, now],
        )?;
        tx.execute("DELETE FROM pending_accruals WHERE event_id = ?1", [id])?;
        if inserted == 0 {
            info!(event_id = id, "change event already processed");
            tx.commit()?;
            return Ok(AccrualOutcome::Duplicate);
        }
    }

    let mut outcomes = Vec::with_capacity(credits.len());
    for credit in credits {
        outcomes.push(credit_user(&tx, credit, now)?);
    }

    tx.commit().map_err(DbError::Sqlite)?;
    Ok(AccrualOutcome::Applied(outcomes))
}
