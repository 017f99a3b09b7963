//! Forward-only schema migrations keyed on `PRAGMA user_version`.
//!
//! Each step runs in its own transaction together with the version bump, so
//! a failed step leaves the database at the previous version.

use rusqlite::Connection;
use tracing::info;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// `(target version, SQL)` pairs in ascending order.
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1), (2, schema::SCHEMA_V2)];

/// Stored schema version.
pub fn current_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let from = current_version(conn)?;
    if from > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database is at v{from}, this build supports up to v{SCHEMA_VERSION}"
        )));
    }

    for &(version, sql) in STEPS.iter().filter(|(v, _)| *v > from) {
        info!(from, to = version, "applying schema migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| DbError::Migration(format!("v{version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    let to = current_version(conn)?;
    if to != SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "no migration path from v{to} to v{SCHEMA_VERSION}"
        )));
    }
    Ok(())
}
