//! Entitlement outbox query functions.
//!
//! A row is queued in the same transaction as the history write it belongs
//! to, so a grant is never lost when the entitlement service is unreachable.

use rusqlite::{Connection, Row};

use crate::{not_found, DbError, Result};

/// Queue a grant and return its row id.
pub fn enqueue(conn: &Connection, uid: &str, duration: &str, created_at: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO entitlement_outbox (uid, duration, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![uid, duration, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a row by id.
pub fn get(conn: &Connection, id: i64) -> Result<OutboxRow> {
    conn.query_row(
        "SELECT id, uid, duration, created_at, attempts, last_error, delivered_at
         FROM entitlement_outbox WHERE id = ?1",
        [id],
        from_row,
    )
    .map_err(not_found(format!("outbox row {id}")))
}

/// Undelivered rows with fewer than `max_attempts` attempts, oldest first.
pub fn pending(conn: &Connection, max_attempts: u32, limit: u32) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, uid, duration, created_at, attempts, last_error, delivered_at
         FROM entitlement_outbox
         WHERE delivered_at IS NULL AND attempts < ?1
         ORDER BY id LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![max_attempts, limit], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark a row delivered.
pub fn mark_delivered(conn: &Connection, id: i64, delivered_at: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE entitlement_outbox SET attempts = attempts + 1, delivered_at = ?1, last_error = NULL
         WHERE id = ?2 AND delivered_at IS NULL",
        rusqlite::params![delivered_at, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending outbox row {id}")));
    }
    Ok(())
}

/// Record a failed delivery attempt.
pub fn record_failure(conn: &Connection, id: i64, error: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE entitlement_outbox SET attempts = attempts + 1, last_error = ?1
         WHERE id = ?2 AND delivered_at IS NULL",
        rusqlite::params![error, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending outbox row {id}")));
    }
    Ok(())
}

/// A raw outbox row from the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRow {
    pub id: i64,
    pub uid: String,
    /// Duration-class name, e.g. `"weekly"`.
    pub duration: String,
    pub created_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub delivered_at: Option<i64>,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        id: row.get(0)?,
        uid: row.get(1)?,
        duration: row.get(2)?,
        created_at: row.get(3)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        delivered_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_enqueue_and_pending() {
        let conn = test_db();
        let a = enqueue(&conn, "u1", "weekly", 100).expect("enqueue");
        let b = enqueue(&conn, "r1", "weekly", 101).expect("enqueue");

        let rows = pending(&conn, 5, 10).expect("pending");
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(rows[0].attempts, 0);
        assert_eq!(rows[0].last_error, None);
    }

    #[test]
    fn test_mark_delivered() {
        let conn = test_db();
        let id = enqueue(&conn, "u1", "daily", 100).expect("enqueue");
        mark_delivered(&conn, id, 200).expect("deliver");

        let row = get(&conn, id).expect("get");
        assert_eq!(row.delivered_at, Some(200));
        assert_eq!(row.attempts, 1);
        assert!(pending(&conn, 5, 10).expect("pending").is_empty());

        // A second delivery of the same row is rejected.
        assert!(matches!(mark_delivered(&conn, id, 300), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_failures_exhaust_attempts() {
        let conn = test_db();
        let id = enqueue(&conn, "u1", "monthly", 100).expect("enqueue");
        record_failure(&conn, id, "status 503").expect("fail 1");
        record_failure(&conn, id, "timeout").expect("fail 2");

        let row = get(&conn, id).expect("get");
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));

        assert_eq!(pending(&conn, 3, 10).expect("pending").len(), 1);
        assert!(pending(&conn, 2, 10).expect("pending").is_empty());
    }

    #[test]
    fn test_get_missing_row() {
        let conn = test_db();
        assert!(matches!(get(&conn, 42), Err(DbError::NotFound(_))));
    }
}
