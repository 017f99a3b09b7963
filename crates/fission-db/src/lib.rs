//! # fission-db
//!
//! Storage layer for the referral bonus ledger.
//! Manages the single SQLite database at `$FISSION_DATA_DIR/<project_id>.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds
//! - Schema version stored in `PRAGMA user_version`
//!
//! ## Consistency
//!
//! Referral records are created with a plain `INSERT` against the uid
//! primary key, so two concurrent intakes for one uid cannot both succeed.
//! Bonus accrual runs inside a single `BEGIN IMMEDIATE` transaction that
//! reads, extends and rewrites the history together with its outbox rows.

pub mod migrations;
pub mod queries;
pub mod schema;

use rusqlite::{Connection, ErrorCode};
use std::path::Path;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl DbError {
    /// Whether the failure is a lock conflict worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Map `QueryReturnedNoRows` to [`DbError::NotFound`].
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> DbError {
    let what = what.into();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(what),
        other => DbError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma<T: rusqlite::types::FromSql>(conn: &Connection, name: &str) -> T {
        conn.pragma_query_value(None, name, |row| row.get(0))
            .unwrap_or_else(|e| panic!("read pragma {name}: {e}"))
    }

    #[test]
    fn test_memory_db_is_configured() {
        let conn = open_memory().expect("open");
        assert_eq!(pragma::<u32>(&conn, "user_version"), SCHEMA_VERSION);
        assert_eq!(pragma::<i32>(&conn, "foreign_keys"), 1);
        assert_eq!(pragma::<i64>(&conn, "busy_timeout"), 5000);
    }

    #[test]
    fn test_open_file_reopens_existing() {
        let dir = std::env::temp_dir().join(format!("fission-db-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("reopen.db");
        let _ = std::fs::remove_file(&path);

        drop(open(&path).expect("create"));
        let conn = open(&path).expect("reopen");
        assert_eq!(pragma::<String>(&conn, "journal_mode"), "wal");

        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_busy_classification() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_busy());
        assert!(!DbError::NotFound("x".into()).is_busy());
    }
}
